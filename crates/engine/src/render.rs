//! Template interpolation and retrieval-context formatting.
//!
//! Prompt templates use `{{name}}` tokens resolved against the run
//! context. A token that resolves to nothing is left literal in the
//! output, so a missing variable stays visible in prompts and trace logs
//! instead of silently vanishing. Malformed templates (an opening marker
//! with no closing `}}`) preserve the remaining text as-is.

use indexmap::IndexMap;
use serde_json::Value;
use waypoint_types::RagTemplateConfig;

use crate::capability::RetrievedChunk;

/// Default per-chunk template applied when none is configured.
const DEFAULT_CHUNK_TEMPLATE: &str = "[{{number}}] {{chunk.text}}";
/// Default context template; `{{prompt}}` keeps the rendered prompt after
/// the retrieved context.
const DEFAULT_CONTEXT_TEMPLATE: &str =
    "Use the following context to answer:\n\n{{chunks}}\n\n{{prompt}}";

/// Interpolate `{{name}}` tokens against the variable store.
pub fn render_template(template: &str, vars: &IndexMap<String, Value>) -> String {
    render_with(template, |name| vars.get(name).map(display_value))
}

/// Interpolate `{{...}}` tokens with an arbitrary resolver. Unresolved
/// tokens are preserved literally.
pub fn render_with(template: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut remainder = template;

    while let Some(start) = remainder.find("{{") {
        let (before, after) = remainder.split_at(start);
        output.push_str(before);

        let Some(end) = after.find("}}") else {
            // No closing marker; preserve the tail untouched.
            output.push_str(after);
            return output;
        };
        let token = &after[2..end];
        match resolve(token.trim()) {
            Some(value) => output.push_str(&value),
            None => output.push_str(&after[..end + 2]),
        }
        remainder = &after[end + 2..];
    }

    output.push_str(remainder);
    output
}

/// Format a JSON value for interpolation into prompt text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(boolean) => boolean.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Format retrieved chunks into the final prompt text.
///
/// Each chunk is rendered through the chunk template (placeholders
/// `{{chunk.text}}`, `{{chunk.source}}`, `{{chunk.id}}`, `{{index}}`,
/// `{{number}}`), the results are joined and substituted for `{{chunks}}`
/// in the context template, and `{{prompt}}` carries the rendered prompt.
/// A context template that never mentions `{{prompt}}` still keeps the
/// prompt: the formatted context is prepended ahead of it.
pub fn format_context(
    chunks: &[RetrievedChunk],
    prompt: &str,
    template: Option<&RagTemplateConfig>,
) -> String {
    let chunk_template = template
        .and_then(|config| config.chunk.as_deref())
        .unwrap_or(DEFAULT_CHUNK_TEMPLATE);
    let context_template = template
        .and_then(|config| config.context.as_deref())
        .unwrap_or(DEFAULT_CONTEXT_TEMPLATE);

    let rendered_chunks: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            render_with(chunk_template, |token| match token {
                "chunk.text" => Some(chunk.text.clone()),
                "chunk.source" => Some(chunk.source.clone()),
                "chunk.id" => Some(chunk.id.clone()),
                "index" => Some(index.to_string()),
                "number" => Some((index + 1).to_string()),
                _ => None,
            })
        })
        .collect();
    let joined = rendered_chunks.join("\n\n");

    let mut saw_prompt = false;
    let rendered = render_with(context_template, |token| match token {
        "chunks" => Some(joined.clone()),
        "prompt" => {
            saw_prompt = true;
            Some(prompt.to_string())
        }
        _ => None,
    });

    if saw_prompt {
        rendered
    } else {
        format!("{rendered}\n\n{prompt}")
    }
}
