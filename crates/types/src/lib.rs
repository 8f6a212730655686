//! Strongly typed manifest schemas shared across the Waypoint crates.
//!
//! Three document families live here:
//!
//! - [`workflow`]: the authored workflow state machine (states, transitions,
//!   RAG and tool-server configuration)
//! - [`testspec`]: scenario test manifests driven by the harness
//! - [`batch`]: the thin manifest listing independent workflow runs
//!
//! All maps preserve authoring order (via `IndexMap`) so diagnostics and
//! generated reports follow the order the operator wrote. Validation of
//! workflow documents is pure (no I/O) and lives in
//! [`workflow::validation`] so it can run standalone against constructed
//! literals.

pub mod batch;
pub mod testspec;
pub mod workflow;

pub use batch::BatchManifest;
pub use testspec::{
    AssertionKind, AssertionSpec, LlmInputGeneration, ScenarioSpec, ScriptedInput, TestManifest,
};
pub use workflow::validation::{validate, ValidationError};
pub use workflow::{
    ChoiceOption, ChoiceSpec, EndSpec, InputSpec, NextOption, PromptSpec, RagConfig, RagSection,
    RagTemplateConfig, StateSpec, ToolServerConfig, UseRag, WorkflowDocument, WorkflowRefSpec,
    TERMINAL_STATE,
};
