//! # Waypoint Engine
//!
//! Parses, composes, validates, and executes declarative LLM workflow state
//! machines.
//!
//! ## Architecture
//!
//! - [`model`]: the composed, immutable runtime model (`Workflow`, closed
//!   `State` enum)
//! - [`compose`]: file loading, `prompt_file` resolution, `workflow_ref`
//!   composition with cycle detection, and validation
//! - [`render`]: `{{name}}` template interpolation and retrieval-context
//!   formatting
//! - [`capability`]: the seams to external collaborators (language model,
//!   retriever, tool host, attachment loader)
//! - [`trace`]: per-run structured trace sink and run session lifecycle
//! - [`executor`]: the sequential state-machine interpreter with
//!   cooperative cancellation and the asynchronous input rendezvous
//! - [`orchestrator`]: batch sequencing of independent runs
//!
//! A single run is one logical thread of control: exactly one state is in
//! flight at any time, with asynchronous suspension at model calls and
//! input rendezvous points. Multiple runs may execute concurrently; each
//! owns its context, session, and event channel.

pub mod capability;
pub mod compose;
pub mod context;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod render;
pub mod trace;

pub use capability::{
    Attachment, AttachmentKind, AttachmentLoader, Capabilities, ChatMessage, ChatRequest,
    EchoModel, GenerateRequest, LanguageModel, RetrievedChunk, Retriever, ToolHost,
};
pub use compose::{parse, ComposeError};
pub use context::RunContext;
pub use executor::{
    run_to_completion, ExecuteError, Executor, ExecutorOptions, InputDeliveryError, InputKind,
    InputRequest, InputResponder, RunEvent, RunOutcome, RunStatus,
};
pub use model::{ChoiceState, InputState, PromptState, RagBinding, State, Workflow};
pub use orchestrator::{run_batch, BatchReport, BatchRunStatus, WorkflowRunReport};
pub use trace::{
    next_run_id, JsonlTracer, MemoryTracer, NullTracer, RunSession, TraceEvent, TraceEventKind,
    Tracer,
};
