//! Scenario test manifest schema consumed by the harness.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A test manifest: one workflow exercised by one or more scenarios.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestManifest {
    /// Path to the workflow under test, relative to the manifest file.
    pub workflow: String,
    /// Suite-level iteration count (overridden per scenario or by the CLI).
    #[serde(default)]
    pub iterations: Option<u32>,
    /// Ordered scenarios.
    #[serde(default)]
    pub test_scenarios: Vec<ScenarioSpec>,
}

/// One scenario: how inputs are supplied plus the assertions that must hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Scripted input mocks fed to Input/Choice states in encounter order.
    /// Mutually exclusive with `llm_input_generation`.
    #[serde(default)]
    pub inputs: Vec<ScriptedInput>,
    /// Model-generated inputs. Mutually exclusive with `inputs`.
    #[serde(default)]
    pub llm_input_generation: Option<LlmInputGeneration>,
    /// Assertions evaluated against the final context and visited history.
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,
    /// Scenario-level iteration count.
    #[serde(default)]
    pub iterations: Option<u32>,
}

/// A single scripted mock: the value delivered when `state` asks for input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptedInput {
    pub state: String,
    pub value: String,
}

/// Configuration for generating scenario inputs with the model itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmInputGeneration {
    /// Generation is skipped (and the scenario malformed) unless enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Model used for the generation call; falls back to the workflow's
    /// default model.
    #[serde(default)]
    pub model: Option<String>,
    /// Extra context prepended to the generation prompt.
    #[serde(default)]
    pub context: Option<String>,
    /// Additional options passed to the generation call.
    #[serde(default)]
    pub options: IndexMap<String, JsonValue>,
}

/// Assertion kinds supported by the harness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Equals,
    Contains,
    NotContains,
    Regex,
    StateReached,
}

/// One assertion over the final run context or visited-state history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssertionSpec {
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    /// Context variable name, or the state identifier for `state_reached`.
    pub target: String,
    /// Expected value, substring, or pattern (unused for `state_reached`).
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Case sensitivity for `equals`/`contains`/`not_contains`.
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    /// Interpret `value` as a regular expression for containment kinds.
    #[serde(default)]
    pub regex: bool,
}

fn default_case_sensitive() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_scripted_scenario() {
        let yaml_text = r#"
workflow: ../workflows/triage.yaml
iterations: 3
test_scenarios:
  - name: happy_path
    inputs:
      - state: report
        value: "disk full on db-2"
    assertions:
      - type: state_reached
        target: done
      - type: contains
        target: summary
        value: "disk"
        case_sensitive: false
"#;

        let manifest: TestManifest = serde_yaml::from_str(yaml_text).expect("parse manifest");
        assert_eq!(manifest.iterations, Some(3));
        let scenario = &manifest.test_scenarios[0];
        assert_eq!(scenario.inputs.len(), 1);
        assert_eq!(scenario.assertions[0].kind, AssertionKind::StateReached);
        assert!(!scenario.assertions[1].case_sensitive);
    }

    #[test]
    fn case_sensitivity_defaults_to_true() {
        let assertion: AssertionSpec = serde_yaml::from_str(
            r#"
type: contains
target: summary
value: Hello
"#,
        )
        .expect("parse assertion");
        assert!(assertion.case_sensitive);
        assert!(!assertion.regex);
    }

    #[test]
    fn deserializes_generation_mode() {
        let scenario: ScenarioSpec = serde_yaml::from_str(
            r#"
name: generated
llm_input_generation:
  enabled: true
  model: llama3
  context: "Pretend to be a sysadmin reporting an outage."
"#,
        )
        .expect("parse scenario");
        let generation = scenario.llm_input_generation.expect("generation config");
        assert!(generation.enabled);
        assert_eq!(generation.model.as_deref(), Some("llama3"));
    }
}
