//! Harness result types.

use std::time::Duration;

use serde::Serialize;

/// The outcome of one assertion.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionOutcome {
    /// The authored description, or a synthesized `kind target` label.
    pub description: String,
    pub passed: bool,
    /// Why the assertion failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The outcome of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub duration: Duration,
    /// Failure outside the assertions: parse error, missing mock,
    /// runtime failure, malformed generation payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub assertions: Vec<AssertionOutcome>,
}

impl ScenarioResult {
    pub(crate) fn failed(name: &str, duration: Duration, error: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            duration,
            error: Some(error),
            assertions: Vec::new(),
        }
    }
}

/// Aggregated results for a scenario repeated over several iterations.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    pub name: String,
    pub iterations: u32,
    pub passed: u32,
    pub failed: u32,
    pub min_duration: Duration,
    pub avg_duration: Duration,
    pub max_duration: Duration,
    pub results: Vec<ScenarioResult>,
}

impl AggregatedResult {
    pub(crate) fn from_results(name: &str, results: Vec<ScenarioResult>) -> Self {
        let passed = results.iter().filter(|result| result.passed).count() as u32;
        let failed = results.len() as u32 - passed;
        let durations: Vec<Duration> = results.iter().map(|result| result.duration).collect();
        let min_duration = durations.iter().min().copied().unwrap_or_default();
        let max_duration = durations.iter().max().copied().unwrap_or_default();
        let avg_duration = if durations.is_empty() {
            Duration::default()
        } else {
            durations.iter().sum::<Duration>() / durations.len() as u32
        };
        Self {
            name: name.to_string(),
            iterations: results.len() as u32,
            passed,
            failed,
            min_duration,
            avg_duration,
            max_duration,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Results for a whole test manifest.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub workflow: String,
    pub scenarios: Vec<AggregatedResult>,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        self.scenarios.iter().all(AggregatedResult::all_passed)
    }

    pub fn totals(&self) -> (u32, u32) {
        self.scenarios.iter().fold((0, 0), |(passed, failed), agg| {
            (passed + agg.passed, failed + agg.failed)
        })
    }
}
