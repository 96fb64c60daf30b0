//! Run reports: the single structured summary every run ends with.

use crate::context::RunContext;
use crate::core::{RunState, StageRun, StageStatus};
use crate::failures::AbsorbedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Wall-clock timing of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Elapsed time between the two, when both are known.
    pub duration: Option<Duration>,
    /// Number of attempts consumed.
    pub attempts: u32,
}

impl From<&StageRun> for StageTiming {
    fn from(run: &StageRun) -> Self {
        Self {
            started_at: run.started_at(),
            finished_at: run.finished_at(),
            duration: run.duration(),
            attempts: run.attempts(),
        }
    }
}

/// Report for a run in which every stage succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Output of every stage, keyed by stage name.
    pub outputs: HashMap<String, Value>,
    /// Per-stage timing and attempt counts.
    pub timings: HashMap<String, StageTiming>,
    /// Retryable errors absorbed along the way.
    pub absorbed_errors: Vec<AbsorbedError>,
    /// Wall-clock duration of the whole run.
    pub total_duration: Duration,
}

impl PipelineResult {
    pub(crate) fn assemble(
        ctx: &RunContext,
        outputs: HashMap<String, Value>,
        total_duration: Duration,
    ) -> Self {
        let timings = ctx
            .runs()
            .records()
            .into_iter()
            .map(|(name, run)| (name, StageTiming::from(&run)))
            .collect();

        Self {
            outputs,
            timings,
            absorbed_errors: ctx.aggregator().entries(),
            total_duration,
        }
    }
}

/// Report for a run halted by a stage failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    /// The stage whose failure halted the run.
    pub failed_stage: String,
    /// The terminal error of that stage.
    pub error: String,
    /// Stages that never launched because of the failure, in execution order.
    pub skipped_stages: Vec<String>,
    /// Outputs of the stages that did succeed.
    pub partial_outputs: HashMap<String, Value>,
    /// Retryable errors absorbed before the run halted.
    pub absorbed_errors: Vec<AbsorbedError>,
    /// Wall-clock duration of the whole run.
    pub total_duration: Duration,
}

impl FailureReport {
    pub(crate) fn assemble(
        ctx: &RunContext,
        failed_stage: String,
        error: String,
        execution_order: &[String],
        partial_outputs: HashMap<String, Value>,
        total_duration: Duration,
    ) -> Self {
        let skipped_stages = execution_order
            .iter()
            .filter(|name| ctx.runs().status_of(name.as_str()) == Some(StageStatus::Skipped))
            .cloned()
            .collect();

        Self {
            failed_stage,
            error,
            skipped_stages,
            partial_outputs,
            absorbed_errors: ctx.aggregator().entries(),
            total_duration,
        }
    }
}

/// Report for a run that ended because it was cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationReport {
    /// The reason passed to the first cancel call, if any.
    pub reason: Option<String>,
    /// Outputs of the stages that finished before cancellation took hold.
    pub partial_outputs: HashMap<String, Value>,
    /// Retryable errors absorbed before cancellation.
    pub absorbed_errors: Vec<AbsorbedError>,
    /// Wall-clock duration of the whole run.
    pub total_duration: Duration,
}

impl CancellationReport {
    pub(crate) fn assemble(
        ctx: &RunContext,
        partial_outputs: HashMap<String, Value>,
        total_duration: Duration,
    ) -> Self {
        Self {
            reason: ctx.cancel_token().reason(),
            partial_outputs,
            absorbed_errors: ctx.aggregator().entries(),
            total_duration,
        }
    }
}

/// The one report every finished run produces.
///
/// A failure observed before cancellation wins: if a stage had already failed
/// when the run was cancelled, the run reports [`RunReport::Failed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunReport {
    /// Every stage succeeded.
    Completed(PipelineResult),
    /// A stage failure halted the run.
    Failed(FailureReport),
    /// Cancellation ended the run.
    Cancelled(CancellationReport),
}

impl RunReport {
    /// True for a fully successful run.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// True when a stage failure halted the run.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True when cancellation ended the run.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// The success report, when the run completed.
    #[must_use]
    pub const fn result(&self) -> Option<&PipelineResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// The failure report, when a stage failure halted the run.
    #[must_use]
    pub const fn failure(&self) -> Option<&FailureReport> {
        match self {
            Self::Failed(report) => Some(report),
            _ => None,
        }
    }

    /// The cancellation report, when cancellation ended the run.
    #[must_use]
    pub const fn cancellation(&self) -> Option<&CancellationReport> {
        match self {
            Self::Cancelled(report) => Some(report),
            _ => None,
        }
    }

    /// The terminal run state this report corresponds to.
    pub(crate) const fn run_state(&self) -> RunState {
        match self {
            Self::Completed(_) => RunState::Completed,
            Self::Failed(_) => RunState::Failed,
            Self::Cancelled(_) => RunState::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineRequest;
    use serde_json::json;

    #[test]
    fn test_run_report_accessors() {
        let report = RunReport::Completed(PipelineResult {
            outputs: HashMap::new(),
            timings: HashMap::new(),
            absorbed_errors: Vec::new(),
            total_duration: Duration::from_millis(5),
        });

        assert!(report.is_completed());
        assert!(!report.is_failed());
        assert!(report.result().is_some());
        assert!(report.failure().is_none());
        assert_eq!(report.run_state(), RunState::Completed);
    }

    #[test]
    fn test_failure_report_collects_skipped_stages() {
        let ctx = RunContext::new(PipelineRequest::default());
        ctx.begin_run(["a", "b", "c"]).unwrap();
        ctx.runs().advance("a", StageStatus::Ready);
        ctx.runs().begin_attempt("a");
        ctx.runs().fail("a", "boom");
        ctx.runs().advance("b", StageStatus::Skipped);
        ctx.runs().advance("c", StageStatus::Skipped);
        ctx.aggregator().record("a", 1, "first try failed");

        let order = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let report = FailureReport::assemble(
            &ctx,
            "a".to_string(),
            "boom".to_string(),
            &order,
            HashMap::new(),
            Duration::from_millis(7),
        );

        assert_eq!(report.failed_stage, "a");
        assert_eq!(report.skipped_stages, vec!["b", "c"]);
        assert_eq!(report.absorbed_errors.len(), 1);
    }

    #[test]
    fn test_cancellation_report_carries_reason() {
        let ctx = RunContext::new(PipelineRequest::default());
        ctx.begin_run(["a"]).unwrap();
        ctx.cancel("deadline exceeded");

        let report =
            CancellationReport::assemble(&ctx, HashMap::new(), Duration::from_millis(3));

        assert_eq!(report.reason.as_deref(), Some("deadline exceeded"));
    }

    #[test]
    fn test_report_serde_tagging() {
        let report = RunReport::Failed(FailureReport {
            failed_stage: "score".to_string(),
            error: "model unavailable".to_string(),
            skipped_stages: vec!["publish".to_string()],
            partial_outputs: HashMap::from([("fetch".to_string(), json!("body"))]),
            absorbed_errors: Vec::new(),
            total_duration: Duration::from_secs(1),
        });

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["failed_stage"], "score");

        let back: RunReport = serde_json::from_value(value).unwrap();
        assert!(back.is_failed());
    }
}
