//! Stage trait and function adapters.
//!
//! Stages are the opaque units of work a pipeline schedules. The engine
//! never looks inside one; it sees only the classified outcome of each
//! attempt.

use crate::context::StageContext;
use crate::errors::WorkError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

/// The work function of a pipeline stage.
///
/// A stage reads the shared request and its declared dependency outputs
/// through the [`StageContext`] and produces one JSON value, which
/// downstream stages consume as-is. Stage names are not part of this trait;
/// they belong to the `StageSpec` that wires a work function into a graph.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Runs one attempt of the work.
    ///
    /// # Errors
    ///
    /// [`WorkError::Retryable`] asks the executor for another attempt within
    /// the retry budget; [`WorkError::Fatal`] fails the stage immediately.
    async fn execute(&self, ctx: &StageContext) -> Result<Value, WorkError>;
}

/// A stage backed by a plain closure.
///
/// Covers the common case of synchronous transformation logic; implement
/// [`Stage`] directly when the work itself needs to await.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> Result<Value, WorkError> + Send + Sync,
{
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> Result<Value, WorkError> + Send + Sync,
{
    /// Wraps a closure as a stage.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> Result<Value, WorkError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> Result<Value, WorkError> + Send + Sync,
{
    async fn execute(&self, ctx: &StageContext) -> Result<Value, WorkError> {
        (self.func)(ctx)
    }
}

/// A stage that succeeds immediately with `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStage;

impl NoOpStage {
    /// Creates a no-op stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for NoOpStage {
    async fn execute(&self, _ctx: &StageContext) -> Result<Value, WorkError> {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineRequest, RunContext, StageInputs};
    use serde_json::json;
    use std::sync::Arc;

    fn test_stage_context() -> StageContext {
        let run = Arc::new(RunContext::new(PipelineRequest::default()));
        StageContext::new(run, "test", StageInputs::default(), 1)
    }

    #[tokio::test]
    async fn test_fn_stage_returns_value() {
        let stage = FnStage::new(|_ctx| Ok(json!({"result": "done"})));

        let ctx = test_stage_context();
        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output["result"], "done");
    }

    #[tokio::test]
    async fn test_fn_stage_propagates_error() {
        let stage = FnStage::new(|_ctx| Err(WorkError::retryable("flaky backend")));

        let ctx = test_stage_context();
        let err = stage.execute(&ctx).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fn_stage_reads_context() {
        let stage = FnStage::new(|ctx: &StageContext| {
            let seed = ctx.request().seed().clone();
            Ok(json!({"echo": seed, "attempt": ctx.attempt()}))
        });

        let run = Arc::new(RunContext::new(PipelineRequest::new(json!("ping"))));
        let ctx = StageContext::new(run, "echo", StageInputs::default(), 1);

        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output["echo"], "ping");
        assert_eq!(output["attempt"], 1);
    }

    #[tokio::test]
    async fn test_noop_stage_returns_null() {
        let stage = NoOpStage::new();

        let ctx = test_stage_context();
        let output = stage.execute(&ctx).await.unwrap();
        assert!(output.is_null());
    }
}
