//! Shared run context and the per-attempt stage context.

use crate::cancellation::CancellationToken;
use crate::context::{PipelineRequest, StageInputs};
use crate::core::{RunState, RunTable, StatusSnapshot};
use crate::errors::FlowgateError;
use crate::failures::ErrorAggregator;
use crate::progress::ProgressReporter;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Shared state of one pipeline run.
///
/// Created per run and passed to `Pipeline::run` as an `Arc`; every holder
/// of the same `Arc` can query [`RunContext::status_snapshot`] or call
/// [`RunContext::cancel`] concurrently with the run. A context is single
/// use: a second `run` with the same context is refused.
pub struct RunContext {
    run_id: Uuid,
    request: PipelineRequest,
    cancel: Arc<CancellationToken>,
    runs: RunTable,
    aggregator: ErrorAggregator,
    progress: RwLock<Option<ProgressReporter>>,
    state: RwLock<RunState>,
}

impl RunContext {
    /// Creates a context for one run of a pipeline.
    #[must_use]
    pub fn new(request: PipelineRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request,
            cancel: Arc::new(CancellationToken::new()),
            runs: RunTable::new(),
            aggregator: ErrorAggregator::new(),
            progress: RwLock::new(None),
            state: RwLock::new(RunState::Initializing),
        }
    }

    /// Attaches the sending half of a progress channel.
    ///
    /// The context takes ownership: the driver drops the reporter exactly
    /// once when the run reaches a terminal report, which closes the
    /// consumer's stream. Callers should keep only the stream.
    #[must_use]
    pub fn with_progress(self, reporter: ProgressReporter) -> Self {
        *self.progress.write() = Some(reporter);
        self
    }

    /// Shares an externally owned cancellation token, for example an
    /// application-wide shutdown signal.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// The unique id of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The immutable input bundle of this run.
    #[must_use]
    pub const fn request(&self) -> &PipelineRequest {
        &self.request
    }

    /// Requests cancellation of the run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The run's cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// The absorbed-error log of this run.
    #[must_use]
    pub const fn aggregator(&self) -> &ErrorAggregator {
        &self.aggregator
    }

    /// The live per-stage records of this run.
    #[must_use]
    pub const fn runs(&self) -> &RunTable {
        &self.runs
    }

    /// The coarse state of the run.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        *self.state.read()
    }

    /// A point-in-time view of the run, safe to call while it executes.
    #[must_use]
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_state: self.run_state(),
            stages: self.runs.snapshot(),
        }
    }

    /// Moves the run from `Initializing` to `Running` and seeds the run
    /// table. Refuses a context that has already been used.
    pub(crate) fn begin_run<'a>(
        &self,
        stages: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), FlowgateError> {
        {
            let mut state = self.state.write();
            if *state != RunState::Initializing {
                return Err(FlowgateError::RunAlreadyStarted);
            }
            *state = RunState::Running;
        }
        self.runs.initialize(stages);
        Ok(())
    }

    /// Records the terminal run state and closes the progress channel.
    pub(crate) fn finish_run(&self, state: RunState) {
        *self.state.write() = state;
        self.progress.write().take();
    }

    /// Emits a progress update on behalf of a stage, if a reporter is
    /// attached.
    pub(crate) fn report_progress(&self, stage: &str, percent: u8, label: impl Into<String>) {
        if let Some(reporter) = self.progress.read().as_ref() {
            reporter.emit(stage, percent, label);
        }
    }
}

/// The per-attempt view handed to a stage's work function.
///
/// Exposes the run request, the outputs of declared dependencies, the
/// attempt number, cooperative cancellation and mid-stage progress
/// reporting. One is built per attempt so the attempt number stays honest.
pub struct StageContext {
    run: Arc<RunContext>,
    stage_name: String,
    inputs: StageInputs,
    attempt: u32,
}

impl StageContext {
    /// Creates a stage context.
    ///
    /// Built by the executor for each attempt; public so downstream crates
    /// can drive their stages directly in tests.
    #[must_use]
    pub fn new(
        run: Arc<RunContext>,
        stage_name: impl Into<String>,
        inputs: StageInputs,
        attempt: u32,
    ) -> Self {
        Self {
            run,
            stage_name: stage_name.into(),
            inputs,
            attempt,
        }
    }

    /// The name of the executing stage.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// The 1-based attempt number of this invocation.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The immutable input bundle of the run.
    #[must_use]
    pub fn request(&self) -> &PipelineRequest {
        self.run.request()
    }

    /// The outputs of this stage's declared dependencies.
    #[must_use]
    pub const fn inputs(&self) -> &StageInputs {
        &self.inputs
    }

    /// Whether the run has been cancelled. Long work functions should poll
    /// this and return early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.run.is_cancelled()
    }

    /// Pushes a stage-scoped progress update (0-100) without blocking.
    pub fn report_progress(&self, percent: u8, label: impl Into<String>) {
        self.run.report_progress(&self.stage_name, percent, label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_context_starts_initializing() {
        let ctx = RunContext::new(PipelineRequest::default());
        assert_eq!(ctx.run_state(), RunState::Initializing);
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_begin_run_is_single_use() {
        let ctx = RunContext::new(PipelineRequest::default());

        assert!(ctx.begin_run(["parse"]).is_ok());
        assert_eq!(ctx.run_state(), RunState::Running);

        let err = ctx.begin_run(["parse"]).unwrap_err();
        assert!(matches!(err, FlowgateError::RunAlreadyStarted));
    }

    #[test]
    fn test_status_snapshot_reflects_table() {
        let ctx = RunContext::new(PipelineRequest::default());
        ctx.begin_run(["parse", "score"]).unwrap();

        let snapshot = ctx.status_snapshot();
        assert_eq!(snapshot.run_state, RunState::Running);
        assert_eq!(snapshot.stages.len(), 2);
    }

    #[test]
    fn test_cancel_reaches_shared_token() {
        let token = Arc::new(CancellationToken::new());
        let ctx =
            RunContext::new(PipelineRequest::default()).with_cancellation(Arc::clone(&token));

        ctx.cancel("operator abort");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("operator abort".to_string()));
    }

    #[tokio::test]
    async fn test_finish_run_closes_progress() {
        let (reporter, mut stream) = progress::channel(8);
        let ctx = RunContext::new(PipelineRequest::default()).with_progress(reporter);

        ctx.report_progress("parse", 100, "completed");
        ctx.finish_run(RunState::Completed);

        assert_eq!(stream.recv().await.unwrap().label, "completed");
        assert!(stream.recv().await.is_none());
        assert_eq!(ctx.run_state(), RunState::Completed);
    }

    #[test]
    fn test_stage_context_exposes_attempt_and_inputs() {
        let run = Arc::new(RunContext::new(PipelineRequest::new(json!({"raw": "x"}))));

        let mut outputs = HashMap::new();
        outputs.insert("parse".to_string(), json!([1, 2, 3]));
        let declared: HashSet<String> = ["parse".to_string()].into_iter().collect();
        let inputs = StageInputs::new(outputs, declared, "score");

        let ctx = StageContext::new(Arc::clone(&run), "score", inputs, 2);

        assert_eq!(ctx.stage_name(), "score");
        assert_eq!(ctx.attempt(), 2);
        assert_eq!(ctx.request().seed()["raw"], "x");
        assert_eq!(ctx.inputs().require("parse").unwrap(), &json!([1, 2, 3]));
        assert!(!ctx.is_cancelled());
    }
}
