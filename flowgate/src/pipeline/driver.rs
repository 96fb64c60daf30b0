//! Pipeline driver: dependency tracking and launch strategies.

use super::executor::{ExecOutcome, StageExecutor};
use super::report::{CancellationReport, FailureReport, PipelineResult, RunReport};
use super::{RetryPolicy, StageSpec};
use crate::admission::AdmissionPool;
use crate::context::{RunContext, StageInputs};
use crate::core::{RunState, StageStatus};
use crate::errors::FlowgateError;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How the driver schedules ready stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One stage at a time, in the pipeline's deterministic topological order.
    Sequential,
    /// Every stage launches as soon as its dependencies have succeeded; the
    /// admission pool is the only throttle.
    #[default]
    Concurrent,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// What happens to in-flight stages once the first failure is observed.
///
/// New launches always stop at the first failure; this policy only decides
/// the fate of stages already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let already-running stages finish their current work.
    #[default]
    DrainRunning,
    /// Cancel already-running stages at their next cancellation point.
    CancelRunning,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DrainRunning => write!(f, "drain_running"),
            Self::CancelRunning => write!(f, "cancel_running"),
        }
    }
}

/// A validated stage graph ready to run.
///
/// Built by [`PipelineBuilder`](super::PipelineBuilder); immutable afterwards,
/// so one pipeline can serve many runs, each with its own [`RunContext`].
#[derive(Debug)]
pub struct Pipeline {
    pub(crate) name: String,
    pub(crate) stages: HashMap<String, Arc<StageSpec>>,
    pub(crate) execution_order: Vec<String>,
    pub(crate) dependents: HashMap<String, Vec<String>>,
    pub(crate) pool: Arc<AdmissionPool>,
    pub(crate) default_retry: RetryPolicy,
    pub(crate) failure_policy: FailurePolicy,
}

impl Pipeline {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of stages in the graph.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// The deterministic topological order used by sequential runs.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// The admission pool bounding concurrent work.
    #[must_use]
    pub const fn admission_pool(&self) -> &Arc<AdmissionPool> {
        &self.pool
    }

    /// The policy applied to in-flight stages after the first failure.
    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Runs the pipeline to a single terminal report.
    ///
    /// The context must be fresh; a run context is consumed by its first run.
    /// Stage failure and cancellation are reported through the returned
    /// [`RunReport`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`FlowgateError::RunAlreadyStarted`] when the context was used
    /// before, and [`FlowgateError::Internal`] when a stage task panics.
    pub async fn run(
        &self,
        ctx: Arc<RunContext>,
        strategy: ExecutionStrategy,
    ) -> Result<RunReport, FlowgateError> {
        ctx.begin_run(self.execution_order.iter().map(String::as_str))?;
        let started = Instant::now();
        info!(
            pipeline = %self.name,
            run_id = %ctx.run_id(),
            %strategy,
            stages = self.execution_order.len(),
            "pipeline run started"
        );

        let outcome = match strategy {
            ExecutionStrategy::Sequential => Ok(self.run_sequential(&ctx, started).await),
            ExecutionStrategy::Concurrent => self.run_concurrent(&ctx, started).await,
        };

        match outcome {
            Ok(report) => {
                ctx.finish_run(report.run_state());
                match &report {
                    RunReport::Completed(result) => info!(
                        pipeline = %self.name,
                        run_id = %ctx.run_id(),
                        duration = ?result.total_duration,
                        "pipeline run completed"
                    ),
                    RunReport::Failed(failure) => warn!(
                        pipeline = %self.name,
                        run_id = %ctx.run_id(),
                        failed_stage = %failure.failed_stage,
                        error = %failure.error,
                        "pipeline run failed"
                    ),
                    RunReport::Cancelled(cancellation) => warn!(
                        pipeline = %self.name,
                        run_id = %ctx.run_id(),
                        reason = cancellation.reason.as_deref().unwrap_or("unspecified"),
                        "pipeline run cancelled"
                    ),
                }
                Ok(report)
            }
            Err(err) => {
                ctx.finish_run(RunState::Failed);
                Err(err)
            }
        }
    }

    /// Runs stages one at a time in topological order.
    async fn run_sequential(&self, ctx: &Arc<RunContext>, started: Instant) -> RunReport {
        let mut outputs: HashMap<String, Value> = HashMap::new();

        for name in &self.execution_order {
            if ctx.is_cancelled() {
                self.mark_remaining(ctx, StageStatus::Cancelled);
                return RunReport::Cancelled(CancellationReport::assemble(
                    ctx,
                    outputs,
                    started.elapsed(),
                ));
            }

            let Some(spec) = self.stages.get(name) else {
                debug_assert!(false, "execution order references unknown stage");
                continue;
            };

            ctx.runs().advance(name, StageStatus::Ready);
            let executor = StageExecutor::new(
                Arc::clone(spec),
                Arc::clone(&self.pool),
                self.default_retry,
            );
            let inputs = self.inputs_for(spec, &outputs);

            match executor.execute(Arc::clone(ctx), inputs).await {
                ExecOutcome::Succeeded(output) => {
                    outputs.insert(name.clone(), output);
                }
                ExecOutcome::Failed(error) => {
                    self.mark_remaining(ctx, StageStatus::Skipped);
                    return RunReport::Failed(FailureReport::assemble(
                        ctx,
                        name.clone(),
                        error,
                        &self.execution_order,
                        outputs,
                        started.elapsed(),
                    ));
                }
                ExecOutcome::Cancelled => {
                    self.mark_remaining(ctx, StageStatus::Cancelled);
                    return RunReport::Cancelled(CancellationReport::assemble(
                        ctx,
                        outputs,
                        started.elapsed(),
                    ));
                }
            }
        }

        RunReport::Completed(PipelineResult::assemble(ctx, outputs, started.elapsed()))
    }

    /// Launches every stage the moment its dependencies have succeeded.
    ///
    /// The driver never throttles: readiness alone decides launch, and the
    /// shared admission pool bounds how many launched stages actually run.
    async fn run_concurrent(
        &self,
        ctx: &Arc<RunContext>,
        started: Instant,
    ) -> Result<RunReport, FlowgateError> {
        let total = self.execution_order.len();
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = self
            .stages
            .iter()
            .map(|(name, spec)| (name.clone(), spec.dependencies.len()))
            .collect();
        let mut active: FuturesUnordered<JoinHandle<(String, ExecOutcome)>> =
            FuturesUnordered::new();
        let mut first_failure: Option<(String, String)> = None;
        let mut halted = false;
        let mut completed = 0usize;

        for name in &self.execution_order {
            if in_degree.get(name).copied() == Some(0) {
                if let Some(spec) = self.stages.get(name) {
                    active.push(self.launch(ctx, spec, &outputs));
                }
            }
        }

        while let Some(joined) = active.next().await {
            let (name, outcome) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    ctx.cancel("stage task panicked");
                    while (active.next().await).is_some() {}
                    return Err(FlowgateError::Internal(format!(
                        "stage task panicked: {err}"
                    )));
                }
            };

            match outcome {
                ExecOutcome::Succeeded(output) => {
                    completed += 1;
                    outputs.insert(name.clone(), output);
                    if !halted && !ctx.is_cancelled() {
                        if let Some(children) = self.dependents.get(&name) {
                            for child in children {
                                if let Some(degree) = in_degree.get_mut(child) {
                                    *degree = degree.saturating_sub(1);
                                    if *degree == 0 {
                                        if let Some(spec) = self.stages.get(child) {
                                            active.push(self.launch(ctx, spec, &outputs));
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                ExecOutcome::Failed(error) => {
                    if first_failure.is_none() {
                        halted = true;
                        if self.failure_policy == FailurePolicy::CancelRunning {
                            ctx.cancel(format!("stage '{name}' failed"));
                        }
                        first_failure = Some((name, error));
                    }
                }
                ExecOutcome::Cancelled => {}
            }
        }

        let elapsed = started.elapsed();
        if let Some((failed_stage, error)) = first_failure {
            self.mark_remaining(ctx, StageStatus::Skipped);
            return Ok(RunReport::Failed(FailureReport::assemble(
                ctx,
                failed_stage,
                error,
                &self.execution_order,
                outputs,
                elapsed,
            )));
        }
        if ctx.is_cancelled() {
            self.mark_remaining(ctx, StageStatus::Cancelled);
            return Ok(RunReport::Cancelled(CancellationReport::assemble(
                ctx, outputs, elapsed,
            )));
        }
        if completed != total {
            return Err(FlowgateError::Internal(format!(
                "scheduler stalled with {completed} of {total} stages completed"
            )));
        }
        Ok(RunReport::Completed(PipelineResult::assemble(
            ctx, outputs, elapsed,
        )))
    }

    /// Marks a stage ready and spawns its executor.
    fn launch(
        &self,
        ctx: &Arc<RunContext>,
        spec: &Arc<StageSpec>,
        outputs: &HashMap<String, Value>,
    ) -> JoinHandle<(String, ExecOutcome)> {
        let name = spec.name.clone();
        ctx.runs().advance(&name, StageStatus::Ready);
        debug!(stage = %name, "stage ready");

        let executor = StageExecutor::new(
            Arc::clone(spec),
            Arc::clone(&self.pool),
            self.default_retry,
        );
        let inputs = self.inputs_for(spec, outputs);
        let task_ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            let outcome = executor.execute(task_ctx, inputs).await;
            (name, outcome)
        })
    }

    /// Builds the dependency-scoped view a stage's work function sees.
    fn inputs_for(&self, spec: &StageSpec, outputs: &HashMap<String, Value>) -> StageInputs {
        let filtered: HashMap<String, Value> = spec
            .dependencies
            .iter()
            .filter_map(|dep| outputs.get(dep).map(|value| (dep.clone(), value.clone())))
            .collect();
        StageInputs::new(filtered, spec.dependencies.clone(), spec.name.clone())
    }

    /// Advances every still-pending stage to the given terminal status.
    fn mark_remaining(&self, ctx: &RunContext, terminal: StageStatus) {
        for name in &self.execution_order {
            if ctx.runs().status_of(name) == Some(StageStatus::Pending) {
                ctx.runs().advance(name, terminal);
            }
        }
    }
}
