//! Mutable per-run execution context.

use indexmap::IndexMap;
use serde_json::Value;

/// The variable store and visited-state history threaded through one run.
///
/// Created fresh per run and mutated monotonically: variables are added or
/// overwritten, never removed, and the history only grows. Discarded when
/// the run ends (the final snapshot travels out on the run outcome).
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Variables in insertion order. Values are strings for model output
    /// and operator input, but structured JSON is allowed.
    pub vars: IndexMap<String, Value>,
    /// Identifiers of every state visited, in execution order.
    pub history: Vec<String>,
}

impl RunContext {
    /// Create a context pre-seeded with initial variables.
    pub fn with_vars(vars: IndexMap<String, Value>) -> Self {
        Self {
            vars,
            history: Vec::new(),
        }
    }

    /// Store a string variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), Value::String(value.into()));
    }

    /// Look up a variable as display text.
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.vars.get(name).map(crate::render::display_value)
    }
}
