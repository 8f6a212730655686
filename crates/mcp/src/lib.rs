//! Tool-server process lifecycle.
//!
//! A [`ToolServerPool`] owns the child processes backing a single run's
//! tool servers. Servers are registered before first use (idempotently:
//! registering the same name twice keeps the running process), stderr is
//! forwarded to tracing, and every process is torn down deterministically
//! when the run ends. Processes are additionally spawned with
//! kill-on-drop so a panicking or cancelled run cannot leak children.
//!
//! The wire protocol spoken over the child's stdio is the transport
//! layer's business; this crate owns process lifecycle only.

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use waypoint_engine::ToolHost;
use waypoint_types::ToolServerConfig;

/// Errors starting a tool-server process.
#[derive(Debug, Error)]
pub enum ToolServerError {
    #[error("tool server '{name}' has an empty command")]
    EmptyCommand { name: String },

    #[error("failed to spawn tool server '{name}' ({command})")]
    Spawn {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },
}

struct RunningServer {
    child: Child,
}

/// The pool of tool-server processes scoped to one run.
#[derive(Default)]
pub struct ToolServerPool {
    servers: Mutex<HashMap<String, RunningServer>>,
}

impl ToolServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the servers currently running.
    pub async fn running(&self) -> Vec<String> {
        self.servers.lock().await.keys().cloned().collect()
    }

    async fn spawn(&self, name: &str, config: &ToolServerConfig) -> Result<(), ToolServerError> {
        if config.command.trim().is_empty() {
            return Err(ToolServerError::EmptyCommand {
                name: name.to_string(),
            });
        }

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| ToolServerError::Spawn {
            name: name.to_string(),
            command: config.command.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(name.to_string(), stderr);
        }
        info!(server = %name, command = %config.command, "tool server started");

        self.servers
            .lock()
            .await
            .insert(name.to_string(), RunningServer { child });
        Ok(())
    }
}

/// Forward a child's stderr lines to tracing so server diagnostics land in
/// the operator's log.
fn spawn_stderr_logger(name: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %name, "{line}");
        }
    });
}

#[async_trait]
impl ToolHost for ToolServerPool {
    async fn register(&self, name: &str, config: &ToolServerConfig) -> Result<()> {
        if self.servers.lock().await.contains_key(name) {
            return Ok(());
        }
        self.spawn(name, config).await?;
        Ok(())
    }

    async fn shutdown_all(&self) {
        let mut servers = self.servers.lock().await;
        for (name, mut server) in servers.drain() {
            match server.child.start_kill() {
                Ok(()) => {
                    if let Err(error) = server.child.wait().await {
                        warn!(server = %name, %error, "failed to reap tool server");
                    } else {
                        info!(server = %name, "tool server stopped");
                    }
                }
                Err(error) => warn!(server = %name, %error, "failed to kill tool server"),
            }
        }
    }
}
