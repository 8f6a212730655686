//! Workflow file parsing and composition.
//!
//! `parse` turns a workflow file into a fully merged [`Workflow`] or a
//! typed error; a partially valid model never escapes. Composition is a
//! pure transform over parsed documents: `prompt_file` references are
//! inlined, `workflow_ref` states are recursively resolved and spliced in
//! under deterministically prefixed identifiers, and a visited-file set
//! threaded through the recursion rejects reference cycles instead of
//! recursing unboundedly.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use waypoint_types::{
    validate, PromptSpec, RagConfig, RagSection, StateSpec, UseRag, ValidationError,
    WorkflowDocument, WorkflowRefSpec, TERMINAL_STATE,
};

use crate::model::{ChoiceState, InputState, PromptState, RagBinding, State, Workflow};

/// Errors raised while parsing or composing workflow files.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("failed to read workflow file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workflow file {path} is not a valid workflow document")]
    Syntax {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("workflow file {path} failed validation")]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error("state '{state}': prompt file {path} could not be read")]
    MissingPromptFile {
        state: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("circular workflow reference: {}", cycle.join(" -> "))]
    CircularReference { cycle: Vec<String> },

    #[error("state '{state}': failed to compose referenced workflow {path}")]
    Composition {
        state: String,
        path: PathBuf,
        #[source]
        source: Box<ComposeError>,
    },

    #[error("{0}")]
    Merge(String),
}

/// Parse a workflow file into a fully composed, validated model.
pub fn parse(path: impl AsRef<Path>) -> Result<Workflow, ComposeError> {
    let mut visiting = IndexSet::new();
    let workflow = parse_recursive(path.as_ref(), &mut visiting)?;
    check_merged(&workflow)?;
    Ok(workflow)
}

fn parse_recursive(path: &Path, visiting: &mut IndexSet<PathBuf>) -> Result<Workflow, ComposeError> {
    let text = fs::read_to_string(path).map_err(|source| ComposeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // Canonicalize so the same file reached through different relative
    // paths still counts as one node in the reference graph.
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if visiting.contains(&canonical) {
        let mut cycle: Vec<String> = visiting
            .iter()
            .map(|entry| entry.display().to_string())
            .collect();
        cycle.push(canonical.display().to_string());
        return Err(ComposeError::CircularReference { cycle });
    }
    visiting.insert(canonical.clone());

    let result = build_workflow(path, &text, visiting);
    visiting.shift_remove(&canonical);
    result
}

fn build_workflow(
    path: &Path,
    text: &str,
    visiting: &mut IndexSet<PathBuf>,
) -> Result<Workflow, ComposeError> {
    let document: WorkflowDocument =
        serde_yaml::from_str(text).map_err(|source| ComposeError::Syntax {
            path: path.to_path_buf(),
            source,
        })?;
    validate(&document).map_err(|source| ComposeError::Validation {
        path: path.to_path_buf(),
        source,
    })?;

    let base_dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let (rag_default, rag_named) = match document.rag {
        None => (None, IndexMap::new()),
        Some(RagSection::Default(config)) => (Some(anchor_rag(config, &base_dir)), IndexMap::new()),
        Some(RagSection::Named(map)) => (
            None,
            map.into_iter()
                .map(|(name, config)| (name, anchor_rag(config, &base_dir)))
                .collect(),
        ),
    };

    let mut workflow = Workflow {
        name: document.name,
        description: document.description,
        default_model: document.default_model,
        start_state: document.start_state,
        on_error: document.on_error,
        rag_default,
        rag_named,
        tool_servers: document.mcp_servers,
        states: IndexMap::new(),
    };

    for (name, spec) in document.states {
        match spec {
            StateSpec::Prompt(spec) => {
                let state = lower_prompt(&name, spec, &base_dir)?;
                workflow.states.insert(name, State::Prompt(state));
            }
            StateSpec::Choice(spec) => {
                workflow.states.insert(
                    name,
                    State::Choice(ChoiceState {
                        prompt: spec.prompt,
                        choices: spec.choices,
                        save_as: spec.save_as,
                        next: spec.next,
                        on_error: spec.on_error,
                    }),
                );
            }
            StateSpec::Input(spec) => {
                workflow.states.insert(
                    name,
                    State::Input(InputState {
                        prompt: spec.prompt,
                        default_value: spec.default_value,
                        save_as: spec.save_as,
                        next: spec.next,
                        on_error: spec.on_error,
                    }),
                );
            }
            StateSpec::End(_) => {
                workflow.states.insert(name, State::End);
            }
            StateSpec::WorkflowRef(spec) => {
                let sub_path = base_dir.join(&spec.workflow);
                let sub = parse_recursive(&sub_path, visiting).map_err(|source| match source {
                    cycle @ ComposeError::CircularReference { .. } => cycle,
                    other => ComposeError::Composition {
                        state: name.clone(),
                        path: sub_path.clone(),
                        source: Box::new(other),
                    },
                })?;
                splice(&mut workflow, &name, &spec, sub)?;
            }
        }
    }

    Ok(workflow)
}

fn anchor_rag(mut config: RagConfig, base_dir: &Path) -> RagConfig {
    if let Some(path) = config.path.take() {
        config.path = Some(base_dir.join(path).display().to_string());
    }
    config
}

fn lower_prompt(
    name: &str,
    spec: PromptSpec,
    base_dir: &Path,
) -> Result<PromptState, ComposeError> {
    let prompt = match (spec.prompt, spec.prompt_file) {
        (Some(text), None) => text,
        (None, Some(file)) => {
            let path = base_dir.join(&file);
            fs::read_to_string(&path).map_err(|source| ComposeError::MissingPromptFile {
                state: name.to_string(),
                path,
                source,
            })?
        }
        // Validation enforces exactly one source.
        _ => String::new(),
    };

    let rag = match (spec.use_rag, spec.rag) {
        (_, Some(inline)) => RagBinding::Inline(anchor_rag(inline, base_dir)),
        (Some(UseRag::Default(true)), None) => RagBinding::Default,
        (Some(UseRag::Named(named)), None) => RagBinding::Named(named),
        _ => RagBinding::None,
    };

    Ok(PromptState {
        prompt,
        save_as: spec.save_as,
        next: spec.next,
        next_options: spec.next_options,
        options: spec.options,
        rag,
        tool_servers: spec.mcp_servers,
        files: spec.files.iter().map(|file| base_dir.join(file)).collect(),
        on_error: spec.on_error,
    })
}

/// Splice a composed sub-workflow into the host in place of `ref_id`.
///
/// Every imported state is renamed with a prefix derived from the
/// referencing state's identifier (the sub's entry state takes over
/// `ref_id` itself so host transitions keep working), imported terminal
/// transitions are rewired to the referencing state's declared `next`,
/// tool-server configurations are merged (host wins on clashes), and
/// retrieval bindings and the sub's workflow-level error fallback are
/// materialized so imported states keep exactly what their own file
/// declared.
fn splice(
    host: &mut Workflow,
    ref_id: &str,
    ref_spec: &WorkflowRefSpec,
    sub: Workflow,
) -> Result<(), ComposeError> {
    let terminal_target = ref_spec
        .next
        .clone()
        .unwrap_or_else(|| TERMINAL_STATE.to_string());

    let end_states: IndexSet<String> = sub
        .states
        .iter()
        .filter(|(_, state)| matches!(state, State::End))
        .map(|(sub_id, _)| sub_id.clone())
        .collect();

    if end_states.contains(&sub.start_state) || !sub.states.contains_key(&sub.start_state) {
        return Err(ComposeError::Merge(format!(
            "state '{ref_id}': referenced workflow '{}' begins at a terminal state",
            sub.name
        )));
    }

    let entry = sub.start_state.clone();
    let rename = |target: &str| -> String {
        if target == TERMINAL_STATE || end_states.contains(target) {
            terminal_target.clone()
        } else if target == entry {
            ref_id.to_string()
        } else {
            format!("{ref_id}__{target}")
        }
    };

    let sub_default = sub.rag_default;
    let sub_named = sub.rag_named;

    for (sub_id, mut state) in sub.states {
        if matches!(state, State::End) {
            continue;
        }

        normalize_implicit_terminal(&mut state);
        // The sub's workflow-level fallback would be lost by splicing;
        // materialize it onto imported states before the rename so the
        // target ends up prefixed like every other internal transition.
        if state.on_error().is_none()
            && let Some(fallback) = &sub.on_error
        {
            set_on_error(&mut state, fallback.clone());
        }
        state.rewrite_targets(&rename);

        if let State::Prompt(prompt) = &mut state {
            prompt.rag = match std::mem::take(&mut prompt.rag) {
                RagBinding::Default => sub_default
                    .clone()
                    .map(RagBinding::Inline)
                    .unwrap_or(RagBinding::None),
                RagBinding::Named(named) => sub_named
                    .get(&named)
                    .cloned()
                    .map(RagBinding::Inline)
                    .unwrap_or(RagBinding::None),
                other => other,
            };
        }

        if sub_id == entry {
            if state.on_error().is_none()
                && let Some(fallback) = &ref_spec.on_error
            {
                set_on_error(&mut state, fallback.clone());
            }
            insert_unique(host, ref_id.to_string(), state)?;
        } else {
            insert_unique(host, rename(&sub_id), state)?;
        }
    }

    for (name, config) in sub.tool_servers {
        host.tool_servers.entry(name).or_insert(config);
    }

    Ok(())
}

fn normalize_implicit_terminal(state: &mut State) {
    match state {
        State::Prompt(prompt) if prompt.next.is_none() && prompt.next_options.is_empty() => {
            prompt.next = Some(TERMINAL_STATE.to_string());
        }
        State::Input(input) if input.next.is_none() => {
            input.next = Some(TERMINAL_STATE.to_string());
        }
        _ => {}
    }
}

fn set_on_error(state: &mut State, target: String) {
    match state {
        State::Prompt(prompt) => prompt.on_error = Some(target),
        State::Choice(choice) => choice.on_error = Some(target),
        State::Input(input) => input.on_error = Some(target),
        State::End => {}
    }
}

fn insert_unique(host: &mut Workflow, id: String, state: State) -> Result<(), ComposeError> {
    if host.states.contains_key(&id) {
        return Err(ComposeError::Merge(format!(
            "composition produced a duplicate state identifier '{id}'"
        )));
    }
    host.states.insert(id, state);
    Ok(())
}

/// Post-merge structural check: every transition target in the final map
/// must resolve to a state or the terminal marker.
fn check_merged(workflow: &Workflow) -> Result<(), ComposeError> {
    if !workflow.states.contains_key(&workflow.start_state) {
        return Err(ComposeError::Merge(format!(
            "start_state '{}' is missing from the composed state map",
            workflow.start_state
        )));
    }
    let resolves = |target: &str| {
        target == TERMINAL_STATE || workflow.states.contains_key(target)
    };
    if let Some(target) = &workflow.on_error
        && !resolves(target)
    {
        return Err(ComposeError::Merge(format!(
            "workflow on_error target '{target}' is missing from the composed state map"
        )));
    }
    for (name, state) in &workflow.states {
        for target in state.targets() {
            if !resolves(target) {
                return Err(ComposeError::Merge(format!(
                    "state '{name}' references '{target}', which is missing from the composed state map"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, file: &str, contents: &str) -> PathBuf {
        let path = dir.join(file);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    const LEAF: &str = r#"
name: leaf
start_state: gather
mcp_servers:
  notes:
    command: notes-server
states:
  gather:
    type: input
    prompt: "Anything to add?"
    save_as: extra
    next: polish
  polish:
    type: prompt
    prompt: "Polish: {{extra}}"
    save_as: polished
    next: end
"#;

    #[test]
    fn parses_a_simple_workflow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "leaf.yaml", LEAF);

        let workflow = parse(&path).expect("parse leaf");
        assert_eq!(workflow.name, "leaf");
        assert_eq!(workflow.states.len(), 2);
        assert!(matches!(workflow.states["polish"], State::Prompt(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = parse(dir.path().join("nope.yaml")).expect_err("missing file");
        assert!(matches!(error, ComposeError::Io { .. }));
    }

    #[test]
    fn invalid_yaml_is_a_syntax_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "bad.yaml", "name: [unclosed");
        let error = parse(&path).expect_err("syntax error");
        assert!(matches!(error, ComposeError::Syntax { .. }));
    }

    #[test]
    fn resolves_prompt_files_relative_to_the_workflow() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("prompts")).expect("mkdir");
        write(dir.path(), "prompts/ask.md", "Ask about {{topic}}");
        let path = write(
            dir.path(),
            "wf.yaml",
            r#"
name: files
start_state: ask
states:
  ask:
    type: prompt
    prompt_file: prompts/ask.md
    next: end
"#,
        );

        let workflow = parse(&path).expect("parse");
        match &workflow.states["ask"] {
            State::Prompt(state) => assert_eq!(state.prompt, "Ask about {{topic}}"),
            other => panic!("expected prompt state, got {other:?}"),
        }
    }

    #[test]
    fn absent_prompt_file_is_distinguishable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "wf.yaml",
            r#"
name: files
start_state: ask
states:
  ask:
    type: prompt
    prompt_file: prompts/gone.md
    next: end
"#,
        );

        let error = parse(&path).expect_err("missing prompt file");
        assert!(matches!(error, ComposeError::MissingPromptFile { ref state, .. } if state == "ask"));
    }

    #[test]
    fn splices_referenced_workflows_with_prefixed_identifiers() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "leaf.yaml", LEAF);
        let host_path = write(
            dir.path(),
            "host.yaml",
            r#"
name: host
start_state: intro
states:
  intro:
    type: prompt
    prompt: "Welcome"
    next: refine
  refine:
    type: workflow_ref
    workflow: leaf.yaml
    next: wrap
  wrap:
    type: prompt
    prompt: "Wrap up: {{polished}}"
    next: end
"#,
        );

        let workflow = parse(&host_path).expect("compose host");

        // The entry of the sub-workflow takes over the referencing id and
        // the rest are prefixed.
        assert!(matches!(workflow.states["refine"], State::Input(_)));
        assert!(matches!(workflow.states["refine__polish"], State::Prompt(_)));
        match &workflow.states["refine"] {
            State::Input(state) => assert_eq!(state.next.as_deref(), Some("refine__polish")),
            other => panic!("expected input state, got {other:?}"),
        }

        // The sub's terminal transition is rewired to the ref's next.
        match &workflow.states["refine__polish"] {
            State::Prompt(state) => assert_eq!(state.next.as_deref(), Some("wrap")),
            other => panic!("expected prompt state, got {other:?}"),
        }

        // Sub tool servers are merged into the host.
        assert!(workflow.tool_servers.contains_key("notes"));

        // Everything imported is reachable from the host entry point.
        assert!(reachable(&workflow, "intro").contains("refine__polish"));
    }

    #[test]
    fn the_same_sub_workflow_can_be_referenced_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "leaf.yaml", LEAF);
        let host_path = write(
            dir.path(),
            "host.yaml",
            r#"
name: host
start_state: first
states:
  first:
    type: workflow_ref
    workflow: leaf.yaml
    next: second
  second:
    type: workflow_ref
    workflow: leaf.yaml
    next: end
"#,
        );

        let workflow = parse(&host_path).expect("compose host");
        assert!(workflow.states.contains_key("first__polish"));
        assert!(workflow.states.contains_key("second__polish"));
    }

    #[test]
    fn sub_workflow_level_fallbacks_survive_splicing() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "guarded.yaml",
            r#"
name: guarded
start_state: step
on_error: rescue
states:
  step:
    type: prompt
    prompt: "try the thing"
    next: end
  rescue:
    type: prompt
    prompt: "recover"
    next: end
"#,
        );
        let host_path = write(
            dir.path(),
            "host.yaml",
            r#"
name: host
start_state: fix
states:
  fix:
    type: workflow_ref
    workflow: guarded.yaml
    next: end
"#,
        );

        let workflow = parse(&host_path).expect("compose host");
        match &workflow.states["fix"] {
            State::Prompt(state) => assert_eq!(state.on_error.as_deref(), Some("fix__rescue")),
            other => panic!("expected prompt state, got {other:?}"),
        }
        match &workflow.states["fix__rescue"] {
            State::Prompt(state) => assert_eq!(state.next.as_deref(), Some("end")),
            other => panic!("expected prompt state, got {other:?}"),
        }
        // The host's own workflow-level fallback is untouched.
        assert_eq!(workflow.on_error, None);
    }

    #[test]
    fn detects_circular_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "a.yaml",
            r#"
name: a
start_state: go
states:
  go:
    type: workflow_ref
    workflow: b.yaml
    next: end
"#,
        );
        let a_path = dir.path().join("a.yaml");
        write(
            dir.path(),
            "b.yaml",
            r#"
name: b
start_state: back
states:
  back:
    type: workflow_ref
    workflow: a.yaml
    next: end
"#,
        );

        let error = parse(&a_path).expect_err("cycle");
        match error {
            ComposeError::CircularReference { cycle } => {
                assert!(cycle.len() >= 3);
                assert!(cycle.first().expect("head").contains("a.yaml"));
                assert!(cycle.last().expect("tail").contains("a.yaml"));
            }
            other => panic!("expected circular reference error, got {other:?}"),
        }
    }

    #[test]
    fn validation_failures_name_the_offending_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "wf.yaml",
            r#"
name: broken
start_state: ask
states:
  ask:
    type: prompt
    prompt: hi
    next: missing
"#,
        );
        let error = parse(&path).expect_err("dangling next");
        assert!(matches!(error, ComposeError::Validation { .. }));
    }

    fn reachable(workflow: &Workflow, from: &str) -> IndexSet<String> {
        let mut seen = IndexSet::new();
        let mut frontier = vec![from.to_string()];
        while let Some(current) = frontier.pop() {
            if current == TERMINAL_STATE || !seen.insert(current.clone()) {
                continue;
            }
            if let Some(state) = workflow.states.get(&current) {
                for target in state.targets() {
                    frontier.push(target.to_string());
                }
            }
        }
        seen
    }
}
