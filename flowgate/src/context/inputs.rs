//! Dependency outputs with strict access enforcement.

use crate::errors::{UndeclaredDependencyError, WorkError};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// An immutable view of upstream stage outputs.
///
/// Access is strict: a work function may only read the outputs of stages its
/// spec declared as dependencies. Touching anything else is an
/// [`UndeclaredDependencyError`], which keeps hidden data couplings out of
/// the graph.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    /// Outputs of stages that have succeeded so far.
    outputs: HashMap<String, Value>,
    /// The declared dependencies of the consuming stage.
    declared_dependencies: HashSet<String>,
    /// The name of the consuming stage (for error messages).
    stage_name: String,
}

impl StageInputs {
    /// Creates new stage inputs.
    #[must_use]
    pub fn new(
        outputs: HashMap<String, Value>,
        declared_dependencies: HashSet<String>,
        stage_name: impl Into<String>,
    ) -> Self {
        Self {
            outputs,
            declared_dependencies,
            stage_name: stage_name.into(),
        }
    }

    /// Gets the output of a declared dependency.
    ///
    /// `Ok(None)` means the dependency is declared but produced no output,
    /// which the driver's launch ordering makes unreachable in practice.
    ///
    /// # Errors
    ///
    /// Returns [`UndeclaredDependencyError`] when `stage` is not in the
    /// consuming stage's dependency set.
    pub fn get(&self, stage: &str) -> Result<Option<&Value>, UndeclaredDependencyError> {
        if !self.declared_dependencies.contains(stage) {
            return Err(UndeclaredDependencyError::new(&self.stage_name, stage));
        }
        Ok(self.outputs.get(stage))
    }

    /// Gets the output of a declared dependency, failing the attempt when it
    /// is undeclared or absent.
    ///
    /// This is the form work functions want: `inputs.require("parse")?`.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`WorkError`] for undeclared access or a missing
    /// output.
    pub fn require(&self, stage: &str) -> Result<&Value, WorkError> {
        match self.get(stage) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(WorkError::fatal(format!(
                "dependency '{stage}' produced no output for stage '{}'",
                self.stage_name
            ))),
            Err(err) => Err(WorkError::fatal(err.to_string())),
        }
    }

    /// Checks whether an output is available for a stage.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.outputs.contains_key(stage)
    }

    /// The declared dependencies of the consuming stage.
    #[must_use]
    pub const fn declared_dependencies(&self) -> &HashSet<String> {
        &self.declared_dependencies
    }

    /// The name of the consuming stage.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_inputs() -> StageInputs {
        let mut outputs = HashMap::new();
        outputs.insert("parse".to_string(), json!({"rows": 120}));
        outputs.insert("score".to_string(), json!(0.87));

        let mut declared = HashSet::new();
        declared.insert("parse".to_string());

        StageInputs::new(outputs, declared, "summarize")
    }

    #[test]
    fn test_declared_dependency_is_readable() {
        let inputs = sample_inputs();
        let value = inputs.get("parse").unwrap();
        assert_eq!(value, Some(&json!({"rows": 120})));
    }

    #[test]
    fn test_undeclared_access_is_refused() {
        let inputs = sample_inputs();

        let err = inputs.get("score").unwrap_err();
        assert_eq!(err.stage, "summarize");
        assert_eq!(err.dependency, "score");
    }

    #[test]
    fn test_require_returns_value() {
        let inputs = sample_inputs();
        assert_eq!(inputs.require("parse").unwrap(), &json!({"rows": 120}));
    }

    #[test]
    fn test_require_maps_undeclared_to_fatal() {
        let inputs = sample_inputs();

        let err = inputs.require("score").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message().contains("score"));
    }

    #[test]
    fn test_require_maps_missing_output_to_fatal() {
        let inputs = StageInputs::new(
            HashMap::new(),
            ["parse".to_string()].into_iter().collect(),
            "summarize",
        );

        let err = inputs.require("parse").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message().contains("no output"));
    }

    #[test]
    fn test_contains() {
        let inputs = sample_inputs();
        assert!(inputs.contains("parse"));
        assert!(!inputs.contains("render"));
    }
}
