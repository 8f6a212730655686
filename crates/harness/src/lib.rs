//! # Waypoint Test Harness
//!
//! Drives the same executor the CLI uses, but under scripted or
//! model-generated inputs, then evaluates assertions against the final
//! run context and the visited-state history.
//!
//! - [`scenario`]: scenario execution, input responders, iteration
//!   aggregation, and whole-manifest runs
//! - [`assertions`]: the assertion engine (`equals`, `contains`,
//!   `not_contains`, `regex`, `state_reached`)
//! - [`report`]: result types for single runs, aggregated iterations, and
//!   manifest suites
//!
//! Assertion failures are recorded per scenario and never abort sibling
//! scenarios or remaining iterations.

pub mod assertions;
pub mod report;
pub mod scenario;

pub use assertions::evaluate_assertion;
pub use report::{AggregatedResult, AssertionOutcome, ScenarioResult, SuiteReport};
pub use scenario::{
    execute_scenario, execute_scenario_with_iterations, resolve_iterations, run_manifest,
};
