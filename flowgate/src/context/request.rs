//! Immutable run input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The immutable input bundle of a pipeline run.
///
/// Carries the seed value consumed by dependency-free stages and a bag of
/// shared context values every stage may read. There is no mutation API:
/// whatever a run starts with is what every stage sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    seed: Value,
    context: HashMap<String, Value>,
}

impl PipelineRequest {
    /// Creates a request around a seed value.
    #[must_use]
    pub fn new(seed: impl Into<Value>) -> Self {
        Self {
            seed: seed.into(),
            context: HashMap::new(),
        }
    }

    /// Adds a shared context value at construction time.
    #[must_use]
    pub fn with_context_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The seed value for dependency-free stages.
    #[must_use]
    pub const fn seed(&self) -> &Value {
        &self.seed
    }

    /// Looks up one shared context value.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// The full shared context map.
    #[must_use]
    pub const fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }
}

impl Default for PipelineRequest {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}
