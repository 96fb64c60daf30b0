//! Per-stage attempt loop: admission, work, retry, cancellation.

use crate::admission::AdmissionPool;
use crate::context::{RunContext, StageContext, StageInputs};
use crate::core::StageStatus;
use crate::pipeline::{RetryPolicy, StageSpec};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Terminal outcome of one stage execution.
#[derive(Debug, Clone)]
pub(crate) enum ExecOutcome {
    /// The stage produced an output.
    Succeeded(Value),
    /// The stage failed fatally or spent its whole attempt budget.
    Failed(String),
    /// Cancellation was observed before the stage reached an outcome.
    Cancelled,
}

/// Drives a single stage to a terminal outcome.
///
/// Every attempt acquires an admission permit before invoking the work
/// function and releases it as soon as the attempt returns, so a stage
/// waiting out a retry delay never holds capacity another stage could use.
/// Cancellation is observed at the permit wait, between attempts and during
/// backoff; the work function itself is never interrupted mid-call.
#[derive(Debug)]
pub(crate) struct StageExecutor {
    spec: Arc<StageSpec>,
    pool: Arc<AdmissionPool>,
    retry: RetryPolicy,
}

impl StageExecutor {
    /// Creates an executor, resolving the spec's retry override against the
    /// pipeline default.
    pub(crate) fn new(
        spec: Arc<StageSpec>,
        pool: Arc<AdmissionPool>,
        default_retry: RetryPolicy,
    ) -> Self {
        let retry = spec.retry.unwrap_or(default_retry);
        Self { spec, pool, retry }
    }

    /// Runs the stage until it succeeds, fails or observes cancellation.
    ///
    /// Retryable errors are absorbed into the run's error aggregator, the
    /// exhausting one included; fatal errors fail the stage on the first
    /// occurrence without being absorbed.
    pub(crate) async fn execute(&self, ctx: Arc<RunContext>, inputs: StageInputs) -> ExecOutcome {
        let stage = self.spec.name.as_str();
        let mut attempt_index: u32 = 0;

        loop {
            if ctx.is_cancelled() {
                ctx.runs().advance(stage, StageStatus::Cancelled);
                return ExecOutcome::Cancelled;
            }

            let permit = match self.pool.acquire(ctx.cancel_token()).await {
                Ok(permit) => permit,
                Err(_) => {
                    ctx.runs().advance(stage, StageStatus::Cancelled);
                    return ExecOutcome::Cancelled;
                }
            };

            let attempt = ctx.runs().begin_attempt(stage);
            if attempt_index == 0 {
                ctx.report_progress(stage, 0, "starting");
            } else {
                ctx.report_progress(stage, 0, format!("attempt {attempt}"));
            }
            debug!(stage, attempt, "stage attempt started");

            let stage_ctx =
                StageContext::new(Arc::clone(&ctx), stage, inputs.clone(), attempt);
            let result = self.spec.work.execute(&stage_ctx).await;
            drop(permit);

            match result {
                Ok(output) => {
                    ctx.runs().succeed(stage, output.clone());
                    ctx.report_progress(stage, 100, "completed");
                    debug!(stage, attempt, "stage succeeded");
                    return ExecOutcome::Succeeded(output);
                }
                Err(_) if ctx.is_cancelled() => {
                    // An error surfacing while the run is being torn down is
                    // neither retried nor absorbed.
                    ctx.runs().advance(stage, StageStatus::Cancelled);
                    return ExecOutcome::Cancelled;
                }
                Err(err) if err.is_retryable() => {
                    let message = err.message().to_string();
                    ctx.aggregator().record(stage, attempt, message.as_str());

                    if attempt_index < self.retry.max_retries {
                        let delay = self.retry.delay_for_attempt(attempt_index);
                        warn!(
                            stage,
                            attempt,
                            ?delay,
                            error = %message,
                            "stage attempt failed, retrying"
                        );
                        ctx.runs().advance(stage, StageStatus::Retrying);
                        ctx.report_progress(
                            stage,
                            0,
                            format!("retrying in {}ms", delay.as_millis()),
                        );
                        if !sleep_cancellable(delay, &ctx).await {
                            ctx.runs().advance(stage, StageStatus::Cancelled);
                            return ExecOutcome::Cancelled;
                        }
                        attempt_index += 1;
                    } else {
                        warn!(
                            stage,
                            attempts = attempt,
                            error = %message,
                            "stage exhausted its attempt budget"
                        );
                        ctx.runs().fail(stage, &message);
                        ctx.report_progress(stage, 0, format!("failed after {attempt} attempts"));
                        return ExecOutcome::Failed(message);
                    }
                }
                Err(err) => {
                    let message = err.message().to_string();
                    warn!(stage, attempt, error = %message, "stage failed");
                    ctx.runs().fail(stage, &message);
                    ctx.report_progress(stage, 0, "failed");
                    return ExecOutcome::Failed(message);
                }
            }
        }
    }
}

/// Sleeps for `delay` unless cancellation arrives first.
///
/// Returns `false` when the sleep was cut short by cancellation.
async fn sleep_cancellable(delay: Duration, ctx: &RunContext) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = ctx.cancel_token().cancelled() => false,
    }
}
