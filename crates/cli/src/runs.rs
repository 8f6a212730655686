//! Run-directory provider: creates `runs/<run_id>/`, persists run
//! metadata, and wires the trace log into a [`RunSession`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use waypoint_engine::{next_run_id, JsonlTracer, RunSession, Workflow};

pub fn create_session(
    runs_dir: &Path,
    workflow: &Workflow,
    workflow_path: &Path,
) -> Result<RunSession> {
    let run_id = next_run_id();
    let dir = runs_dir.join(&run_id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create run directory {}", dir.display()))?;

    let metadata = json!({
        "run_id": run_id,
        "workflow": workflow.name,
        "description": workflow.description,
        "workflow_path": workflow_path.display().to_string(),
        "default_model": workflow.default_model,
        "started_at": Utc::now().to_rfc3339(),
    });
    fs::write(
        dir.join("metadata.json"),
        serde_json::to_string_pretty(&metadata).expect("metadata serializes"),
    )
    .with_context(|| format!("failed to write metadata under {}", dir.display()))?;

    let tracer = JsonlTracer::create(dir.join("trace.jsonl"))
        .with_context(|| format!("failed to create trace log under {}", dir.display()))?;

    Ok(RunSession::new(run_id, Some(dir), Arc::new(tracer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn minimal_workflow() -> Workflow {
        Workflow {
            name: "fixture".into(),
            description: Some("a fixture".into()),
            default_model: None,
            start_state: "done".into(),
            on_error: None,
            rag_default: None,
            rag_named: IndexMap::new(),
            tool_servers: IndexMap::new(),
            states: [("done".to_string(), waypoint_engine::State::End)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn creates_directory_metadata_and_trace_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = create_session(dir.path(), &minimal_workflow(), Path::new("wf.yaml"))
            .expect("create session");

        let run_dir = session.dir().expect("run dir").to_path_buf();
        assert!(run_dir.starts_with(dir.path()));
        assert!(run_dir.join("metadata.json").exists());

        session.close();
        assert!(run_dir.join("trace.jsonl").exists());

        let metadata = fs::read_to_string(run_dir.join("metadata.json")).expect("read metadata");
        assert!(metadata.contains("\"workflow\": \"fixture\""));
    }
}
