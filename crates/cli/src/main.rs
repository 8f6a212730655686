use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use waypoint_engine::{orchestrator, Capabilities, Executor, ExecutorOptions, RunSession};
use waypoint_harness as harness;
use waypoint_llm::ModelClient;
use waypoint_mcp::ToolServerPool;

mod console;
mod files;
mod report;
mod retrieval;
mod runs;

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Declarative LLM workflow runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow interactively.
    Run {
        /// Path to the workflow file.
        workflow: PathBuf,
        /// Seed a context variable, e.g. --var name=Ada. Repeatable.
        #[arg(long = "var", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,
        /// Override the workflow's default model.
        #[arg(long)]
        model: Option<String>,
        /// Directory run artifacts are written under.
        #[arg(long, default_value = "runs")]
        runs_dir: PathBuf,
        /// Skip run-directory creation and trace persistence.
        #[arg(long)]
        no_save: bool,
    },
    /// Parse and validate a workflow without executing it.
    Validate {
        /// Path to the workflow file.
        workflow: PathBuf,
    },
    /// Run a scenario test manifest.
    Test {
        /// Path to the test manifest.
        manifest: PathBuf,
        /// Override every scenario's iteration count.
        #[arg(long)]
        iterations: Option<u32>,
        /// Emit the report as JSON instead of console text.
        #[arg(long)]
        json: bool,
    },
    /// Execute every workflow named by a batch manifest, in order.
    Batch {
        /// Path to the batch manifest.
        manifest: PathBuf,
        /// Directory run artifacts are written under.
        #[arg(long, default_value = "runs")]
        runs_dir: PathBuf,
        /// Skip run-directory creation and trace persistence.
        #[arg(long)]
        no_save: bool,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            vars,
            model,
            runs_dir,
            no_save,
        } => run_workflow(workflow, vars, model, runs_dir, no_save).await,
        Commands::Validate { workflow } => validate_workflow(workflow),
        Commands::Test {
            manifest,
            iterations,
            json,
        } => run_tests(manifest, iterations, json).await,
        Commands::Batch {
            manifest,
            runs_dir,
            no_save,
        } => run_batch(manifest, runs_dir, no_save).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Capability bundle backed by the local model endpoint and the thin
/// file-based collaborators.
fn build_capabilities() -> Result<Capabilities> {
    let model = ModelClient::new_from_env().context("configure model client")?;
    Ok(Capabilities::new(Arc::new(model))
        .with_retriever(Arc::new(retrieval::FileRetriever))
        .with_tools(Arc::new(ToolServerPool::new()))
        .with_attachments(Arc::new(files::FsAttachmentLoader)))
}

async fn run_workflow(
    workflow_path: PathBuf,
    vars: Vec<(String, String)>,
    model: Option<String>,
    runs_dir: PathBuf,
    no_save: bool,
) -> Result<()> {
    let workflow = waypoint_engine::parse(&workflow_path)
        .with_context(|| format!("failed to load {}", workflow_path.display()))?;

    let session = if no_save {
        RunSession::ephemeral()
    } else {
        runs::create_session(&runs_dir, &workflow, &workflow_path)?
    };
    let run_id = session.run_id().to_string();
    info!(workflow = %workflow.name, run_id, "starting run");

    let options = ExecutorOptions {
        initial_vars: vars
            .into_iter()
            .map(|(key, value)| (key, serde_json::Value::String(value)))
            .collect(),
        model,
    };
    let (executor, events) = Executor::new(workflow, build_capabilities()?, session, options);
    let outcome = console::drive_interactive(Arc::new(executor), events).await?;

    report::print_run_outcome(&outcome);
    Ok(())
}

fn validate_workflow(workflow_path: PathBuf) -> Result<()> {
    let workflow = waypoint_engine::parse(&workflow_path)
        .with_context(|| format!("failed to load {}", workflow_path.display()))?;
    println!(
        "{} is valid: {} states, entry '{}'",
        workflow_path.display(),
        workflow.states.len(),
        workflow.start_state
    );
    Ok(())
}

async fn run_tests(manifest: PathBuf, iterations: Option<u32>, json: bool) -> Result<()> {
    let caps = build_capabilities()?;
    let suite = harness::run_manifest(&manifest, &caps, iterations).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&suite)?);
    } else {
        report::print_suite(&suite);
    }

    if !suite.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_batch(manifest: PathBuf, runs_dir: PathBuf, no_save: bool) -> Result<()> {
    let caps = build_capabilities()?;
    let responder = Arc::new(console::ConsoleResponder::new());
    let manifest_path = manifest.clone();

    let report = orchestrator::run_batch(&manifest_path, caps, responder, &|workflow| {
        if no_save {
            RunSession::ephemeral()
        } else {
            runs::create_session(&runs_dir, workflow, &manifest)
                .unwrap_or_else(|_| RunSession::ephemeral())
        }
    })
    .await?;

    report::print_batch(&report);
    if !report.all_completed() {
        std::process::exit(1);
    }
    Ok(())
}
