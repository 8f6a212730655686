//! Scenario execution over the engine's executor.
//!
//! A scenario supplies inputs either as a fixed ordered list of
//! `{state, value}` mocks or by asking the model to invent values for the
//! workflow's input states. Both modes drive the real executor through
//! the same input rendezvous the CLI uses; nothing is special-cased for
//! tests beyond where the answers come from.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use waypoint_engine::render::display_value;
use waypoint_engine::{
    compose, run_to_completion, Capabilities, Executor, ExecutorOptions, GenerateRequest,
    InputRequest, InputResponder, RunSession, RunStatus, State, Workflow,
};
use waypoint_types::{ScenarioSpec, ScriptedInput, TestManifest};

use crate::assertions::evaluate_assertion;
use crate::report::{AggregatedResult, ScenarioResult, SuiteReport};

/// Resolve the effective iteration count:
/// CLI override > scenario-level > suite-level > 1.
pub fn resolve_iterations(
    cli_override: Option<u32>,
    scenario: Option<u32>,
    suite: Option<u32>,
) -> u32 {
    cli_override.or(scenario).or(suite).unwrap_or(1).max(1)
}

/// Execute one scenario against the workflow at `workflow_path`.
///
/// Failures outside the assertions (parse errors, a missing mock, a
/// malformed generation payload, a runtime failure) are recorded on the
/// result; they never panic and never abort sibling scenarios.
pub async fn execute_scenario(
    workflow_path: &Path,
    scenario: &ScenarioSpec,
    caps: &Capabilities,
) -> ScenarioResult {
    let started = Instant::now();

    let generation_enabled = scenario
        .llm_input_generation
        .as_ref()
        .is_some_and(|generation| generation.enabled);
    if !scenario.inputs.is_empty() && generation_enabled {
        return ScenarioResult::failed(
            &scenario.name,
            started.elapsed(),
            "scenario declares both scripted inputs and llm_input_generation; the modes are mutually exclusive".into(),
        );
    }

    let workflow = match compose::parse(workflow_path) {
        Ok(workflow) => workflow,
        Err(error) => {
            return ScenarioResult::failed(&scenario.name, started.elapsed(), error.to_string());
        }
    };

    let responder = if generation_enabled {
        let generation = scenario
            .llm_input_generation
            .as_ref()
            .expect("generation checked above");
        match generate_inputs(&workflow, generation, caps).await {
            Ok(values) => Arc::new(HarnessResponder::generated(values)),
            Err(error) => {
                return ScenarioResult::failed(&scenario.name, started.elapsed(), error);
            }
        }
    } else {
        Arc::new(HarnessResponder::scripted(&scenario.inputs))
    };

    let (executor, events) = Executor::new(
        workflow,
        caps.clone(),
        RunSession::ephemeral(),
        ExecutorOptions::default(),
    );
    let bridge_responder: Arc<dyn InputResponder> = responder.clone();
    let outcome = run_to_completion(Arc::new(executor), events, bridge_responder).await;

    if let Some(failure) = responder.failure() {
        return ScenarioResult::failed(&scenario.name, started.elapsed(), failure);
    }

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(error) => {
            return ScenarioResult::failed(&scenario.name, started.elapsed(), error.to_string());
        }
    };
    if outcome.status == RunStatus::Cancelled {
        return ScenarioResult::failed(
            &scenario.name,
            started.elapsed(),
            "run was cancelled before reaching an end state".into(),
        );
    }

    let assertions: Vec<_> = scenario
        .assertions
        .iter()
        .map(|assertion| evaluate_assertion(assertion, &outcome.vars, &outcome.history))
        .collect();
    let passed = assertions.iter().all(|outcome| outcome.passed);

    ScenarioResult {
        name: scenario.name.clone(),
        passed,
        duration: started.elapsed(),
        error: None,
        assertions,
    }
}

/// Execute a scenario `iterations` times and aggregate the results.
pub async fn execute_scenario_with_iterations(
    workflow_path: &Path,
    scenario: &ScenarioSpec,
    caps: &Capabilities,
    iterations: u32,
) -> AggregatedResult {
    let mut results = Vec::with_capacity(iterations as usize);
    for iteration in 0..iterations {
        debug!(scenario = %scenario.name, iteration, "running scenario iteration");
        results.push(execute_scenario(workflow_path, scenario, caps).await);
    }
    AggregatedResult::from_results(&scenario.name, results)
}

/// Run every scenario of a test manifest.
pub async fn run_manifest(
    manifest_path: &Path,
    caps: &Capabilities,
    cli_iterations: Option<u32>,
) -> Result<SuiteReport> {
    let text = fs::read_to_string(manifest_path)
        .with_context(|| format!("failed to read test manifest {}", manifest_path.display()))?;
    let manifest: TestManifest = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid test manifest {}", manifest_path.display()))?;

    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let workflow_path = base_dir.join(&manifest.workflow);

    let mut scenarios = Vec::with_capacity(manifest.test_scenarios.len());
    for scenario in &manifest.test_scenarios {
        let iterations =
            resolve_iterations(cli_iterations, scenario.iterations, manifest.iterations);
        scenarios
            .push(execute_scenario_with_iterations(&workflow_path, scenario, caps, iterations).await);
    }

    Ok(SuiteReport {
        workflow: workflow_path.display().to_string(),
        scenarios,
    })
}

/// Answers the executor's input requests from the scenario's mocks, or
/// from model-generated values with the state's declared default as the
/// fallback. An unanswerable request stops the run and records why.
struct HarnessResponder {
    mode: ResponderMode,
    failure: Mutex<Option<String>>,
}

enum ResponderMode {
    /// Each request consumes the first unconsumed mock for its state.
    Scripted(Mutex<Vec<Option<ScriptedInput>>>),
    Generated(HashMap<String, String>),
}

impl HarnessResponder {
    fn scripted(inputs: &[ScriptedInput]) -> Self {
        Self {
            mode: ResponderMode::Scripted(Mutex::new(inputs.iter().cloned().map(Some).collect())),
            failure: Mutex::new(None),
        }
    }

    fn generated(values: HashMap<String, String>) -> Self {
        Self {
            mode: ResponderMode::Generated(values),
            failure: Mutex::new(None),
        }
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().expect("failure lock").clone()
    }

    fn fail(&self, message: String) {
        *self.failure.lock().expect("failure lock") = Some(message);
    }
}

#[async_trait]
impl InputResponder for HarnessResponder {
    async fn respond(&self, request: &InputRequest) -> Option<String> {
        match &self.mode {
            ResponderMode::Scripted(mocks) => {
                let mut mocks = mocks.lock().expect("mocks lock");
                let slot = mocks.iter_mut().find(|slot| {
                    slot.as_ref().is_some_and(|mock| mock.state == request.state)
                });
                match slot.and_then(Option::take) {
                    Some(mock) => Some(mock.value),
                    None => {
                        self.fail(format!(
                            "no scripted input declared for state '{}'",
                            request.state
                        ));
                        None
                    }
                }
            }
            ResponderMode::Generated(values) => {
                match values
                    .get(&request.state)
                    .cloned()
                    .or_else(|| request.default_value.clone())
                {
                    Some(value) => Some(value),
                    None => {
                        self.fail(format!(
                            "the model generated no value for state '{}' and it declares no default",
                            request.state
                        ));
                        None
                    }
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct GeneratedInput {
    state: String,
    value: Value,
}

/// Ask the model for a value per input-collecting state and parse the
/// strict JSON array it must reply with.
async fn generate_inputs(
    workflow: &Workflow,
    generation: &waypoint_types::LlmInputGeneration,
    caps: &Capabilities,
) -> Result<HashMap<String, String>, String> {
    let mut listing = String::new();
    for (name, state) in &workflow.states {
        match state {
            State::Input(input) => {
                listing.push_str(&format!(
                    "- {name}: {} (freeform text)\n",
                    input.prompt.as_deref().unwrap_or("no prompt")
                ));
            }
            State::Choice(choice) => {
                let values: Vec<&str> = choice
                    .choices
                    .iter()
                    .map(|option| option.value.as_str())
                    .collect();
                listing.push_str(&format!(
                    "- {name}: choose one of [{}]\n",
                    values.join(", ")
                ));
            }
            _ => {}
        }
    }
    if listing.is_empty() {
        return Ok(HashMap::new());
    }

    let mut prompt = format!(
        "You are generating test inputs for the workflow '{}'.\n",
        workflow.name
    );
    if let Some(description) = &workflow.description {
        prompt.push_str(&format!("Workflow description: {description}\n"));
    }
    if let Some(context) = &generation.context {
        prompt.push_str(&format!("Context: {context}\n"));
    }
    prompt.push_str(
        "\nProvide a realistic value for each of these input states:\n",
    );
    prompt.push_str(&listing);
    prompt.push_str(
        "\nRespond with ONLY a JSON array of objects, one per state, like:\n[{\"state\": \"name\", \"value\": \"the value\"}]\n",
    );

    let request = GenerateRequest {
        model: generation
            .model
            .clone()
            .or_else(|| workflow.default_model.clone()),
        prompt,
        options: generation.options.clone(),
        ..Default::default()
    };
    let response = caps
        .model
        .generate(request)
        .await
        .map_err(|error| format!("input generation call failed: {error}"))?;

    parse_generated(&response)
}

/// Parse the model's reply as a strict JSON array, tolerating a fenced
/// ```json block around it.
fn parse_generated(response: &str) -> Result<HashMap<String, String>, String> {
    let trimmed = strip_fence(response.trim());
    let inputs: Vec<GeneratedInput> = serde_json::from_str(trimmed).map_err(|error| {
        format!("input generation did not return a valid JSON array: {error}")
    })?;
    Ok(inputs
        .into_iter()
        .map(|input| (input.state, display_value(&input.value)))
        .collect())
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}
