//! The composed runtime workflow model.
//!
//! This is the resolved counterpart of the raw document schema in
//! `waypoint-types`: prompt files are inlined, `workflow_ref` states have
//! been spliced away, attachment and retrieval paths are absolute, and
//! every transition target resolves against the merged state map (or the
//! terminal marker). The executor dispatches over the closed [`State`]
//! enum, so a new variant is a compile-time exhaustiveness error.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use waypoint_types::{ChoiceOption, NextOption, RagConfig, ToolServerConfig};

/// A fully composed, validated workflow ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    /// Canonical workflow name.
    pub name: String,
    /// Descriptive copy, surfaced in reports and input generation.
    pub description: Option<String>,
    /// Model identifier used when the executor has no override.
    pub default_model: Option<String>,
    /// Identifier of the state executed first.
    pub start_state: String,
    /// Workflow-level error fallback target.
    pub on_error: Option<String>,
    /// The unnamed default retrieval configuration.
    pub rag_default: Option<RagConfig>,
    /// Named retrieval configurations.
    pub rag_named: IndexMap<String, RagConfig>,
    /// Tool-server configurations merged across composed files.
    pub tool_servers: IndexMap<String, ToolServerConfig>,
    /// The merged state map. Insertion order matters only for diagnostics.
    pub states: IndexMap<String, State>,
}

impl Workflow {
    /// Resolve a state's retrieval binding with precedence
    /// inline > named > default.
    pub fn resolve_rag<'a>(&'a self, binding: &'a RagBinding) -> Option<&'a RagConfig> {
        match binding {
            RagBinding::None => None,
            RagBinding::Inline(config) => Some(config),
            RagBinding::Named(name) => self.rag_named.get(name),
            RagBinding::Default => self.rag_default.as_ref(),
        }
    }
}

/// A composed state. `workflow_ref` never survives composition.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Prompt(PromptState),
    Choice(ChoiceState),
    Input(InputState),
    End,
}

impl State {
    /// State-level error fallback target, if declared.
    pub fn on_error(&self) -> Option<&str> {
        match self {
            State::Prompt(state) => state.on_error.as_deref(),
            State::Choice(state) => state.on_error.as_deref(),
            State::Input(state) => state.on_error.as_deref(),
            State::End => None,
        }
    }

    /// Apply `rewrite` to every transition target declared on this state.
    /// Used by the composer when splicing renamed sub-workflow states.
    pub fn rewrite_targets(&mut self, rewrite: &dyn Fn(&str) -> String) {
        let apply = |target: &mut Option<String>| {
            if let Some(value) = target.take() {
                *target = Some(rewrite(&value));
            }
        };
        match self {
            State::Prompt(state) => {
                apply(&mut state.next);
                apply(&mut state.on_error);
                for option in &mut state.next_options {
                    option.state = rewrite(&option.state);
                }
            }
            State::Choice(state) => {
                apply(&mut state.next);
                apply(&mut state.on_error);
                for choice in &mut state.choices {
                    choice.next = rewrite(&choice.next);
                }
            }
            State::Input(state) => {
                apply(&mut state.next);
                apply(&mut state.on_error);
            }
            State::End => {}
        }
    }

    /// All transition targets declared on this state, for reachability and
    /// resolution checks.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets = Vec::new();
        match self {
            State::Prompt(state) => {
                targets.extend(state.next.as_deref());
                targets.extend(state.on_error.as_deref());
                targets.extend(state.next_options.iter().map(|option| option.state.as_str()));
            }
            State::Choice(state) => {
                targets.extend(state.next.as_deref());
                targets.extend(state.on_error.as_deref());
                targets.extend(state.choices.iter().map(|choice| choice.next.as_str()));
            }
            State::Input(state) => {
                targets.extend(state.next.as_deref());
                targets.extend(state.on_error.as_deref());
            }
            State::End => {}
        }
        targets
    }
}

/// A prompt state with its text fully resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptState {
    /// Resolved prompt text (inline or loaded from `prompt_file`).
    pub prompt: String,
    pub save_as: Option<String>,
    pub next: Option<String>,
    /// Model-chosen transition candidates; empty when `next` routing is
    /// static.
    pub next_options: Vec<NextOption>,
    /// Per-call model options passed through verbatim.
    pub options: IndexMap<String, JsonValue>,
    /// Retrieval binding for this call.
    pub rag: RagBinding,
    /// Tool-server names registered before the call.
    pub tool_servers: Vec<String>,
    /// Attachment paths, absolute after composition.
    pub files: Vec<PathBuf>,
    pub on_error: Option<String>,
}

/// A choice state branching on an externally supplied selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceState {
    pub prompt: Option<String>,
    pub choices: Vec<ChoiceOption>,
    pub save_as: Option<String>,
    /// Default transition when no declared value matches.
    pub next: Option<String>,
    pub on_error: Option<String>,
}

/// An input state collecting freeform text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputState {
    pub prompt: Option<String>,
    pub default_value: Option<String>,
    pub save_as: Option<String>,
    pub next: Option<String>,
    pub on_error: Option<String>,
}

/// How a prompt state binds to retrieval configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RagBinding {
    /// No retrieval for this call.
    #[default]
    None,
    /// The workflow's unnamed default configuration.
    Default,
    /// A named configuration.
    Named(String),
    /// A configuration declared inline on the state.
    Inline(RagConfig),
}
