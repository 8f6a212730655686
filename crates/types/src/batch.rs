//! Batch manifest schema: an ordered list of independent workflow runs.

use serde::{Deserialize, Serialize};

/// The batch manifest consumed by the orchestrator. Paths are resolved
/// relative to the manifest's own location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchManifest {
    /// Optional display name for reports.
    #[serde(default)]
    pub name: Option<String>,
    /// Workflow files to execute, in order.
    pub workflows: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_manifest() {
        let manifest: BatchManifest = serde_yaml::from_str(
            r#"
name: nightly
workflows:
  - triage.yaml
  - summarize.yaml
"#,
        )
        .expect("parse batch manifest");
        assert_eq!(manifest.workflows.len(), 2);
        assert_eq!(manifest.name.as_deref(), Some("nightly"));
    }
}
