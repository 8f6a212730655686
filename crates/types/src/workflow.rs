//! Workflow document schema.
//!
//! These models mirror the authoring surface of a workflow file: a named
//! state machine whose states drive a local language model, gather operator
//! input, branch on model output, and terminate. Authoring order is
//! preserved (`IndexMap`) so validation errors and trace output follow the
//! order the file was written in.
//!
//! A document is the *raw* form: `prompt_file` references are unresolved
//! and `workflow_ref` states still point at other files. The engine's
//! composer turns a document into the merged runtime model.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

/// Literal transition target that finishes a run without requiring a
/// declared state of that name.
pub const TERMINAL_STATE: &str = "end";

/// A complete authored workflow document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDocument {
    /// Canonical workflow name used in reports and run metadata.
    pub name: String,
    /// Optional descriptive copy (also fed to the harness's input generator).
    #[serde(default)]
    pub description: Option<String>,
    /// Model identifier used for prompt states that do not override it.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Identifier of the state executed first.
    pub start_state: String,
    /// Workflow-level error fallback target (state name or `end`).
    #[serde(default)]
    pub on_error: Option<String>,
    /// Retrieval configuration: a single unnamed default or a named map.
    #[serde(default)]
    pub rag: Option<RagSection>,
    /// Tool-server processes available to prompt states, keyed by name.
    #[serde(default)]
    pub mcp_servers: IndexMap<String, ToolServerConfig>,
    /// The state machine, keyed by state identifier.
    #[serde(default)]
    pub states: IndexMap<String, StateSpec>,
}

/// One authored state, discriminated by its `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateSpec {
    /// Renders a prompt, calls the model once, optionally routes on the
    /// model's answer.
    Prompt(PromptSpec),
    /// Presents a fixed set of options and branches on the selection.
    Choice(ChoiceSpec),
    /// Collects freeform text from the external input source.
    Input(InputSpec),
    /// Terminal state.
    End(EndSpec),
    /// Splices another workflow file in at composition time.
    WorkflowRef(WorkflowRefSpec),
}

impl StateSpec {
    /// The authored `type` tag, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StateSpec::Prompt(_) => "prompt",
            StateSpec::Choice(_) => "choice",
            StateSpec::Input(_) => "input",
            StateSpec::End(_) => "end",
            StateSpec::WorkflowRef(_) => "workflow_ref",
        }
    }
}

/// A prompt state: one model call, optional retrieval context, tools, and
/// attachments, with either a static `next` or model-driven `next_options`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptSpec {
    /// Inline prompt text. Mutually exclusive with `prompt_file`.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Path to a prompt file, relative to the defining workflow file.
    #[serde(default)]
    pub prompt_file: Option<String>,
    /// Context variable the model response is stored under.
    #[serde(default)]
    pub save_as: Option<String>,
    /// Static transition target. Mutually exclusive with `next_options`.
    #[serde(default)]
    pub next: Option<String>,
    /// Model-chosen transition candidates. Requires at least two entries.
    #[serde(default)]
    pub next_options: Vec<NextOption>,
    /// Per-call model options passed through verbatim (temperature, etc.).
    #[serde(default)]
    pub options: IndexMap<String, JsonValue>,
    /// Reference to the default (`true`) or a named retrieval config.
    #[serde(default)]
    pub use_rag: Option<UseRag>,
    /// Inline retrieval config. Mutually exclusive with `use_rag`.
    #[serde(default)]
    pub rag: Option<RagConfig>,
    /// Names of tool servers made available during the call.
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    /// File attachments, relative to the defining workflow file.
    #[serde(default)]
    pub files: Vec<String>,
    /// State-level error fallback target.
    #[serde(default)]
    pub on_error: Option<String>,
}

/// One candidate for model-driven routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextOption {
    /// Target state identifier.
    pub state: String,
    /// Description the routing call presents to the model.
    pub description: String,
}

/// A choice state: branch on an externally supplied selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChoiceSpec {
    /// Prompt shown before the options.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Ordered selectable options.
    #[serde(default)]
    pub choices: Vec<ChoiceOption>,
    /// Context variable the selected value is stored under.
    #[serde(default)]
    pub save_as: Option<String>,
    /// Default transition when the selection matches no declared value.
    #[serde(default)]
    pub next: Option<String>,
    /// State-level error fallback target.
    #[serde(default)]
    pub on_error: Option<String>,
}

/// One selectable option of a choice state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Label presented to the operator.
    pub label: String,
    /// Value the selection is matched against and stored as.
    pub value: String,
    /// Transition target when this option is selected.
    pub next: String,
}

/// An input state: freeform text from the external input source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputSpec {
    /// Prompt shown to the operator.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Value substituted when the submission is empty.
    #[serde(default)]
    pub default_value: Option<String>,
    /// Context variable the value is stored under.
    #[serde(default)]
    pub save_as: Option<String>,
    /// Transition target.
    #[serde(default)]
    pub next: Option<String>,
    /// State-level error fallback target.
    #[serde(default)]
    pub on_error: Option<String>,
}

/// Terminal state payload. Carries no fields; present so `type: end` is an
/// explicit authoring choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndSpec {}

/// A composition reference to another workflow file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRefSpec {
    /// Path to the referenced workflow file, relative to the defining file.
    pub workflow: String,
    /// Where the imported workflow's terminal transitions are rewired to.
    #[serde(default)]
    pub next: Option<String>,
    /// State-level error fallback target.
    #[serde(default)]
    pub on_error: Option<String>,
}

/// Reference to a workflow-level retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UseRag {
    /// `use_rag: true` selects the unnamed default config (`false` opts out).
    Default(bool),
    /// `use_rag: <name>` selects a named config.
    Named(String),
}

/// The workflow-level `rag` section: a single unnamed default config or a
/// named map of configs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RagSection {
    /// One unnamed configuration acting as the default.
    Default(RagConfig),
    /// Named configurations referenced via `use_rag: <name>`.
    Named(IndexMap<String, RagConfig>),
}

/// Retrieval configuration carried by the workflow. Retrieval internals
/// (chunking, embeddings, caching) live behind the engine's `Retriever`
/// capability; this is the configuration handed to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RagConfig {
    /// Document source (directory or file), relative to the workflow file.
    #[serde(default)]
    pub path: Option<String>,
    /// Number of chunks to retrieve.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Formatting templates applied to retrieved chunks.
    #[serde(default)]
    pub template: Option<RagTemplateConfig>,
}

/// Templates used to format retrieved chunks into prompt context.
///
/// Chunk templates may reference `{{chunk.text}}`, `{{chunk.source}}`,
/// `{{chunk.id}}`, `{{index}}`, and `{{number}}`; the context template may
/// reference `{{chunks}}` and `{{prompt}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RagTemplateConfig {
    /// Per-chunk template.
    #[serde(default)]
    pub chunk: Option<String>,
    /// Overall context template combining the chunks with the prompt.
    #[serde(default)]
    pub context: Option<String>,
}

/// A process-backed tool server made available to prompt states.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolServerConfig {
    /// Command to execute.
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the process.
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tagged_states() {
        let yaml_text = r#"
name: triage
start_state: ask
default_model: llama3
states:
  ask:
    type: prompt
    prompt: "Summarize: {{report}}"
    save_as: summary
    next: pick
  pick:
    type: choice
    prompt: "How should we proceed?"
    choices:
      - label: "File it"
        value: file
        next: done
      - label: "Escalate"
        value: escalate
        next: done
    save_as: action
  done:
    type: end
"#;

        let document: WorkflowDocument =
            serde_yaml::from_str(yaml_text).expect("deserialize workflow document");

        assert_eq!(document.name, "triage");
        assert_eq!(document.states.len(), 3);
        assert!(matches!(document.states["ask"], StateSpec::Prompt(_)));
        assert!(matches!(document.states["pick"], StateSpec::Choice(_)));
        assert!(matches!(document.states["done"], StateSpec::End(_)));
    }

    #[test]
    fn rag_section_accepts_single_and_named_forms() {
        let single: WorkflowDocument = serde_yaml::from_str(
            r#"
name: t
start_state: s
rag:
  path: docs/
  top_k: 5
states:
  s: { type: end }
"#,
        )
        .expect("single rag");
        assert!(matches!(single.rag, Some(RagSection::Default(_))));

        let named: WorkflowDocument = serde_yaml::from_str(
            r#"
name: t
start_state: s
rag:
  manuals:
    path: docs/manuals
  incidents:
    path: docs/incidents
    top_k: 2
states:
  s: { type: end }
"#,
        )
        .expect("named rag");
        match named.rag {
            Some(RagSection::Named(map)) => {
                assert_eq!(map.len(), 2);
                assert_eq!(map["incidents"].top_k, Some(2));
            }
            other => panic!("expected named rag section, got {other:?}"),
        }
    }

    #[test]
    fn use_rag_accepts_bool_and_name() {
        let spec: PromptSpec =
            serde_yaml::from_str("prompt: hi\nuse_rag: true\n").expect("bool use_rag");
        assert_eq!(spec.use_rag, Some(UseRag::Default(true)));

        let spec: PromptSpec =
            serde_yaml::from_str("prompt: hi\nuse_rag: manuals\n").expect("named use_rag");
        assert_eq!(spec.use_rag, Some(UseRag::Named("manuals".into())));
    }

    #[test]
    fn tool_server_config_parses_env_map() {
        let config: ToolServerConfig = serde_yaml::from_str(
            r#"
command: npx
args: ["-y", "@modelcontextprotocol/server-filesystem", "."]
env:
  LOG_LEVEL: debug
"#,
        )
        .expect("tool server config");
        assert_eq!(config.command, "npx");
        assert_eq!(config.args.len(), 3);
        assert_eq!(config.env["LOG_LEVEL"], "debug");
    }

    #[test]
    fn repository_sample_workflow_parses() {
        let yaml_text = include_str!("../../../workflows/triage.yaml");
        let document: WorkflowDocument =
            serde_yaml::from_str(yaml_text).expect("parse sample workflow");
        assert_eq!(document.name, "incident-triage");
        assert!(document.states.contains_key(&document.start_state));
    }
}
