//! Declarative stage specification.

use crate::context::StageContext;
use crate::errors::WorkError;
use crate::pipeline::RetryPolicy;
use crate::stages::{FnStage, Stage};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// One stage of a pipeline: a unique name, the names of the stages whose
/// outputs it consumes, an opaque work function and an optional retry
/// override.
///
/// Specs are plain data; all graph-level validation (unknown names, cycles,
/// duplicates) happens when the builder assembles them into a `Pipeline`.
/// Dependencies may name stages that are added to the builder later.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Unique stage name within the pipeline.
    pub name: String,
    /// Names of stages whose outputs this stage consumes.
    pub dependencies: HashSet<String>,
    /// The work function.
    pub work: Arc<dyn Stage>,
    /// Per-stage retry override; `None` uses the pipeline default.
    pub retry: Option<RetryPolicy>,
}

impl StageSpec {
    /// Creates a spec with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, work: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            dependencies: HashSet::new(),
            work,
            retry: None,
        }
    }

    /// Creates a spec around a plain closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StageContext) -> Result<Value, WorkError> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(FnStage::new(func)))
    }

    /// Adds one dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    /// Adds several dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Overrides the pipeline-wide retry policy for this stage.
    #[must_use]
    pub const fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Whether the spec names itself as a dependency.
    pub(crate) fn depends_on_self(&self) -> bool {
        self.dependencies.contains(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;
    use serde_json::json;

    #[test]
    fn test_spec_builder_methods() {
        let spec = StageSpec::new("summarize", Arc::new(NoOpStage::new()))
            .with_dependency("parse")
            .with_dependencies(["score", "classify"])
            .with_retry(RetryPolicy::new(1));

        assert_eq!(spec.name, "summarize");
        assert_eq!(spec.dependencies.len(), 3);
        assert!(spec.dependencies.contains("parse"));
        assert_eq!(spec.retry.map(|r| r.max_retries), Some(1));
    }

    #[test]
    fn test_from_fn_wraps_closure() {
        let spec = StageSpec::from_fn("echo", |_ctx| Ok(json!("hi")));
        assert_eq!(spec.name, "echo");
        assert!(spec.dependencies.is_empty());
        assert!(spec.retry.is_none());
    }

    #[test]
    fn test_depends_on_self() {
        let spec = StageSpec::new("loop", Arc::new(NoOpStage::new())).with_dependency("loop");
        assert!(spec.depends_on_self());

        let spec = StageSpec::new("ok", Arc::new(NoOpStage::new())).with_dependency("other");
        assert!(!spec.depends_on_self());
    }
}
