//! Batch sequencing of independent workflow runs.
//!
//! The orchestrator reads a second, simpler manifest listing workflow
//! files, runs each through the same [`Executor`], and collects an ordered
//! result set. It adds no execution semantics: entries run sequentially,
//! one failing entry never aborts the rest, and inputs are answered by the
//! caller-supplied responder.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use waypoint_types::BatchManifest;

use crate::capability::Capabilities;
use crate::compose;
use crate::executor::{run_to_completion, Executor, ExecutorOptions, InputResponder, RunStatus};
use crate::model::Workflow;
use crate::trace::RunSession;

/// How one batch entry settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchRunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// The outcome of one batch entry.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunReport {
    /// Workflow name when parsing succeeded, otherwise the manifest entry.
    pub workflow: String,
    pub path: PathBuf,
    pub status: BatchRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: Duration,
}

/// Ordered results for one batch manifest.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub runs: Vec<WorkflowRunReport>,
}

impl BatchReport {
    pub fn all_completed(&self) -> bool {
        self.runs
            .iter()
            .all(|run| run.status == BatchRunStatus::Completed)
    }
}

/// Execute every workflow named by the batch manifest, in order.
///
/// Workflow paths resolve relative to the manifest's location. The
/// `sessions` callback supplies a [`RunSession`] per parsed workflow so
/// callers control persistence; use `|_| RunSession::ephemeral()` when no
/// trace is wanted.
pub async fn run_batch(
    manifest_path: &Path,
    caps: Capabilities,
    responder: Arc<dyn InputResponder>,
    sessions: &dyn Fn(&Workflow) -> RunSession,
) -> Result<BatchReport> {
    let text = fs::read_to_string(manifest_path)
        .with_context(|| format!("failed to read batch manifest {}", manifest_path.display()))?;
    let manifest: BatchManifest = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid batch manifest {}", manifest_path.display()))?;

    let base_dir = manifest_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut runs = Vec::with_capacity(manifest.workflows.len());
    for entry in &manifest.workflows {
        let path = base_dir.join(entry);
        let started = Instant::now();

        let workflow = match compose::parse(&path) {
            Ok(workflow) => workflow,
            Err(error) => {
                runs.push(WorkflowRunReport {
                    workflow: entry.clone(),
                    path,
                    status: BatchRunStatus::Failed,
                    error: Some(error.to_string()),
                    duration: started.elapsed(),
                });
                continue;
            }
        };

        let name = workflow.name.clone();
        info!(workflow = %name, path = %path.display(), "starting batch entry");
        let session = sessions(&workflow);
        let (executor, events) = Executor::new(
            workflow,
            caps.clone(),
            session,
            ExecutorOptions::default(),
        );
        let result =
            run_to_completion(Arc::new(executor), events, responder.clone()).await;

        let (status, error) = match result {
            Ok(outcome) => (
                match outcome.status {
                    RunStatus::Completed => BatchRunStatus::Completed,
                    RunStatus::Cancelled => BatchRunStatus::Cancelled,
                },
                None,
            ),
            Err(error) => (BatchRunStatus::Failed, Some(error.to_string())),
        };
        runs.push(WorkflowRunReport {
            workflow: name,
            path,
            status,
            error,
            duration: started.elapsed(),
        });
    }

    Ok(BatchReport {
        name: manifest.name,
        runs,
    })
}
