//! Pure structural validation of workflow documents.
//!
//! `validate` performs every schema check that does not require I/O, so it
//! can run standalone against constructed literals as well as inside the
//! composer. Checks run in authoring order and the first violation is
//! returned; a document that validates once validates identically again.

use indexmap::IndexSet;
use thiserror::Error;

use super::{
    ChoiceSpec, InputSpec, PromptSpec, RagSection, StateSpec, UseRag, WorkflowDocument,
    WorkflowRefSpec, TERMINAL_STATE,
};

/// A structural violation in a workflow document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("start_state '{0}' does not name a declared state")]
    UnknownStartState(String),

    #[error("state '{state}': {field} target '{target}' does not name a declared state")]
    UnknownTarget {
        state: String,
        field: &'static str,
        target: String,
    },

    #[error("workflow on_error target '{0}' does not name a declared state")]
    UnknownWorkflowFallback(String),

    #[error("state '{0}': exactly one of 'prompt' and 'prompt_file' is required")]
    PromptSourceConflict(String),

    #[error("state '{0}': 'next' and 'next_options' are mutually exclusive")]
    NextConflict(String),

    #[error("state '{0}': 'next_options' requires at least two entries")]
    TooFewNextOptions(String),

    #[error("state '{state}': next_options entry {index} has an empty state identifier")]
    EmptyNextOptionState { state: String, index: usize },

    #[error("state '{state}': next_options entry {index} has an empty description")]
    EmptyNextOptionDescription { state: String, index: usize },

    #[error("state '{state}': next_options lists '{target}' more than once")]
    DuplicateNextOption { state: String, target: String },

    #[error("state '{0}': 'use_rag' and an inline 'rag' block are mutually exclusive")]
    RagReferenceConflict(String),

    #[error("state '{state}': use_rag names '{name}' but no such rag configuration exists")]
    UnknownRagReference { state: String, name: String },

    #[error("state '{0}': use_rag requests the default rag configuration but none is declared")]
    MissingDefaultRag(String),

    #[error("state '{state}': mcp server '{name}' is not declared in mcp_servers")]
    UnknownToolServer { state: String, name: String },

    #[error("state '{0}': a choice state requires a non-empty 'choices' list")]
    MissingChoices(String),

    #[error("state '{state}': choice {index} has an empty value")]
    EmptyChoiceValue { state: String, index: usize },

    #[error("state '{0}': workflow_ref requires a non-empty 'workflow' path")]
    EmptyWorkflowRef(String),
}

/// Validate a workflow document against the structural rules.
///
/// Transition targets are resolved against the document's own state map
/// plus the literal terminal marker; composition re-runs this check on the
/// merged result, so a `workflow_ref` state is a legitimate target here.
pub fn validate(document: &WorkflowDocument) -> Result<(), ValidationError> {
    if document.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !document.states.contains_key(&document.start_state) {
        return Err(ValidationError::UnknownStartState(
            document.start_state.clone(),
        ));
    }
    if let Some(target) = &document.on_error
        && !resolves(document, target)
    {
        return Err(ValidationError::UnknownWorkflowFallback(target.clone()));
    }

    for (name, state) in &document.states {
        match state {
            StateSpec::Prompt(spec) => validate_prompt(document, name, spec)?,
            StateSpec::Choice(spec) => validate_choice(document, name, spec)?,
            StateSpec::Input(spec) => validate_input(document, name, spec)?,
            StateSpec::End(_) => {}
            StateSpec::WorkflowRef(spec) => validate_workflow_ref(document, name, spec)?,
        }
    }

    Ok(())
}

fn resolves(document: &WorkflowDocument, target: &str) -> bool {
    target == TERMINAL_STATE || document.states.contains_key(target)
}

fn check_target(
    document: &WorkflowDocument,
    state: &str,
    field: &'static str,
    target: Option<&String>,
) -> Result<(), ValidationError> {
    if let Some(target) = target
        && !resolves(document, target)
    {
        return Err(ValidationError::UnknownTarget {
            state: state.to_string(),
            field,
            target: target.clone(),
        });
    }
    Ok(())
}

fn validate_prompt(
    document: &WorkflowDocument,
    name: &str,
    spec: &PromptSpec,
) -> Result<(), ValidationError> {
    if spec.prompt.is_some() == spec.prompt_file.is_some() {
        return Err(ValidationError::PromptSourceConflict(name.to_string()));
    }

    if spec.next.is_some() && !spec.next_options.is_empty() {
        return Err(ValidationError::NextConflict(name.to_string()));
    }
    if !spec.next_options.is_empty() {
        if spec.next_options.len() < 2 {
            return Err(ValidationError::TooFewNextOptions(name.to_string()));
        }
        let mut seen = IndexSet::new();
        for (index, option) in spec.next_options.iter().enumerate() {
            if option.state.trim().is_empty() {
                return Err(ValidationError::EmptyNextOptionState {
                    state: name.to_string(),
                    index,
                });
            }
            if option.description.trim().is_empty() {
                return Err(ValidationError::EmptyNextOptionDescription {
                    state: name.to_string(),
                    index,
                });
            }
            if !seen.insert(option.state.clone()) {
                return Err(ValidationError::DuplicateNextOption {
                    state: name.to_string(),
                    target: option.state.clone(),
                });
            }
            if !resolves(document, &option.state) {
                return Err(ValidationError::UnknownTarget {
                    state: name.to_string(),
                    field: "next_options",
                    target: option.state.clone(),
                });
            }
        }
    }

    match (&spec.use_rag, &spec.rag) {
        (Some(UseRag::Default(false)), _) | (None, _) => {}
        (Some(_), Some(_)) => {
            return Err(ValidationError::RagReferenceConflict(name.to_string()));
        }
        (Some(UseRag::Named(rag_name)), None) => {
            let known = matches!(
                &document.rag,
                Some(RagSection::Named(map)) if map.contains_key(rag_name)
            );
            if !known {
                return Err(ValidationError::UnknownRagReference {
                    state: name.to_string(),
                    name: rag_name.clone(),
                });
            }
        }
        (Some(UseRag::Default(true)), None) => {
            if !matches!(&document.rag, Some(RagSection::Default(_))) {
                return Err(ValidationError::MissingDefaultRag(name.to_string()));
            }
        }
    }

    for server in &spec.mcp_servers {
        if !document.mcp_servers.contains_key(server) {
            return Err(ValidationError::UnknownToolServer {
                state: name.to_string(),
                name: server.clone(),
            });
        }
    }

    check_target(document, name, "next", spec.next.as_ref())?;
    check_target(document, name, "on_error", spec.on_error.as_ref())
}

fn validate_choice(
    document: &WorkflowDocument,
    name: &str,
    spec: &ChoiceSpec,
) -> Result<(), ValidationError> {
    if spec.choices.is_empty() {
        return Err(ValidationError::MissingChoices(name.to_string()));
    }
    for (index, choice) in spec.choices.iter().enumerate() {
        if choice.value.trim().is_empty() {
            return Err(ValidationError::EmptyChoiceValue {
                state: name.to_string(),
                index,
            });
        }
        check_target(document, name, "choices", Some(&choice.next))?;
    }
    check_target(document, name, "next", spec.next.as_ref())?;
    check_target(document, name, "on_error", spec.on_error.as_ref())
}

fn validate_input(
    document: &WorkflowDocument,
    name: &str,
    spec: &InputSpec,
) -> Result<(), ValidationError> {
    check_target(document, name, "next", spec.next.as_ref())?;
    check_target(document, name, "on_error", spec.on_error.as_ref())
}

fn validate_workflow_ref(
    document: &WorkflowDocument,
    name: &str,
    spec: &WorkflowRefSpec,
) -> Result<(), ValidationError> {
    if spec.workflow.trim().is_empty() {
        return Err(ValidationError::EmptyWorkflowRef(name.to_string()));
    }
    check_target(document, name, "next", spec.next.as_ref())?;
    check_target(document, name, "on_error", spec.on_error.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ChoiceOption, NextOption};
    use indexmap::IndexMap;

    fn prompt(next: Option<&str>) -> StateSpec {
        StateSpec::Prompt(PromptSpec {
            prompt: Some("hi".into()),
            next: next.map(String::from),
            ..Default::default()
        })
    }

    fn document(states: Vec<(&str, StateSpec)>) -> WorkflowDocument {
        WorkflowDocument {
            name: "fixture".into(),
            description: None,
            default_model: None,
            start_state: states
                .first()
                .map(|(name, _)| name.to_string())
                .unwrap_or_default(),
            on_error: None,
            rag: None,
            mcp_servers: IndexMap::new(),
            states: states
                .into_iter()
                .map(|(name, state)| (name.to_string(), state))
                .collect(),
        }
    }

    #[test]
    fn accepts_minimal_document() {
        let doc = document(vec![("ask", prompt(Some("end")))]);
        validate(&doc).expect("valid document");
    }

    #[test]
    fn validation_is_idempotent() {
        let doc = document(vec![("ask", prompt(Some("end")))]);
        validate(&doc).expect("first pass");
        validate(&doc).expect("second pass");
    }

    #[test]
    fn rejects_unknown_start_state() {
        let mut doc = document(vec![("ask", prompt(None))]);
        doc.start_state = "missing".into();
        assert_eq!(
            validate(&doc),
            Err(ValidationError::UnknownStartState("missing".into()))
        );
    }

    #[test]
    fn rejects_dangling_next() {
        let doc = document(vec![("ask", prompt(Some("nowhere")))]);
        assert!(matches!(
            validate(&doc),
            Err(ValidationError::UnknownTarget { field: "next", .. })
        ));
    }

    #[test]
    fn terminal_marker_is_always_a_valid_target() {
        let doc = document(vec![("ask", prompt(Some(TERMINAL_STATE)))]);
        validate(&doc).expect("terminal marker resolves");
    }

    #[test]
    fn rejects_next_alongside_next_options() {
        let doc = document(vec![
            (
                "ask",
                StateSpec::Prompt(PromptSpec {
                    prompt: Some("hi".into()),
                    next: Some("a".into()),
                    next_options: vec![
                        NextOption {
                            state: "a".into(),
                            description: "first".into(),
                        },
                        NextOption {
                            state: "b".into(),
                            description: "second".into(),
                        },
                    ],
                    ..Default::default()
                }),
            ),
            ("a", prompt(None)),
            ("b", prompt(None)),
        ]);
        assert_eq!(validate(&doc), Err(ValidationError::NextConflict("ask".into())));
    }

    #[test]
    fn rejects_single_entry_next_options() {
        let doc = document(vec![
            (
                "ask",
                StateSpec::Prompt(PromptSpec {
                    prompt: Some("hi".into()),
                    next_options: vec![NextOption {
                        state: "a".into(),
                        description: "only".into(),
                    }],
                    ..Default::default()
                }),
            ),
            ("a", prompt(None)),
        ]);
        assert_eq!(
            validate(&doc),
            Err(ValidationError::TooFewNextOptions("ask".into()))
        );
    }

    #[test]
    fn rejects_duplicate_next_option_targets() {
        let doc = document(vec![
            (
                "ask",
                StateSpec::Prompt(PromptSpec {
                    prompt: Some("hi".into()),
                    next_options: vec![
                        NextOption {
                            state: "a".into(),
                            description: "first".into(),
                        },
                        NextOption {
                            state: "a".into(),
                            description: "again".into(),
                        },
                    ],
                    ..Default::default()
                }),
            ),
            ("a", prompt(None)),
        ]);
        assert!(matches!(
            validate(&doc),
            Err(ValidationError::DuplicateNextOption { .. })
        ));
    }

    #[test]
    fn rejects_prompt_with_both_sources() {
        let doc = document(vec![(
            "ask",
            StateSpec::Prompt(PromptSpec {
                prompt: Some("hi".into()),
                prompt_file: Some("hi.md".into()),
                ..Default::default()
            }),
        )]);
        assert_eq!(
            validate(&doc),
            Err(ValidationError::PromptSourceConflict("ask".into()))
        );
    }

    #[test]
    fn rejects_rag_reference_conflict() {
        let doc = document(vec![(
            "ask",
            StateSpec::Prompt(PromptSpec {
                prompt: Some("hi".into()),
                use_rag: Some(UseRag::Default(true)),
                rag: Some(Default::default()),
                ..Default::default()
            }),
        )]);
        assert_eq!(
            validate(&doc),
            Err(ValidationError::RagReferenceConflict("ask".into()))
        );
    }

    #[test]
    fn rejects_unresolved_named_rag() {
        let doc = document(vec![(
            "ask",
            StateSpec::Prompt(PromptSpec {
                prompt: Some("hi".into()),
                use_rag: Some(UseRag::Named("manuals".into())),
                ..Default::default()
            }),
        )]);
        assert!(matches!(
            validate(&doc),
            Err(ValidationError::UnknownRagReference { .. })
        ));
    }

    #[test]
    fn rejects_unknown_tool_server_reference() {
        let doc = document(vec![(
            "ask",
            StateSpec::Prompt(PromptSpec {
                prompt: Some("hi".into()),
                mcp_servers: vec!["fs".into()],
                ..Default::default()
            }),
        )]);
        assert!(matches!(
            validate(&doc),
            Err(ValidationError::UnknownToolServer { .. })
        ));
    }

    #[test]
    fn rejects_choice_without_options() {
        let doc = document(vec![(
            "pick",
            StateSpec::Choice(ChoiceSpec::default()),
        )]);
        assert_eq!(
            validate(&doc),
            Err(ValidationError::MissingChoices("pick".into()))
        );
    }

    #[test]
    fn rejects_dangling_choice_target() {
        let doc = document(vec![(
            "pick",
            StateSpec::Choice(ChoiceSpec {
                choices: vec![ChoiceOption {
                    label: "A".into(),
                    value: "a".into(),
                    next: "missing".into(),
                }],
                ..Default::default()
            }),
        )]);
        assert!(matches!(
            validate(&doc),
            Err(ValidationError::UnknownTarget {
                field: "choices",
                ..
            })
        ));
    }

    #[test]
    fn rejects_dangling_workflow_fallback() {
        let mut doc = document(vec![("ask", prompt(None))]);
        doc.on_error = Some("missing".into());
        assert_eq!(
            validate(&doc),
            Err(ValidationError::UnknownWorkflowFallback("missing".into()))
        );
    }
}
