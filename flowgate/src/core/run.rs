//! Per-run execution records and the live table of stage state.

use crate::core::status::{RunState, StageStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Mutable bookkeeping for one stage within one run.
///
/// Every mutation goes through the transition rules of
/// [`StageStatus::can_advance_to`]; a refused transition leaves the record
/// untouched. Timestamps are set once: `started_at` by the first attempt,
/// `finished_at` when the stage reaches a terminal state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageRun {
    status: StageStatus,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    output: Option<Value>,
    error: Option<String>,
}

impl StageRun {
    /// Creates a fresh record in `Pending`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> StageStatus {
        self.status
    }

    /// Number of work-function attempts made so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the first attempt began, if the stage ever started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the stage reached a terminal state.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall-clock time from first attempt to terminal state.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => (finished - started).to_std().ok(),
            _ => None,
        }
    }

    /// The output value, present only after `Succeeded`.
    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// The terminal error message, present only after `Failed`.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Attempts the transition to `next`, refusing regressions.
    ///
    /// Returns whether the transition was applied.
    pub(crate) fn advance(&mut self, next: StageStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            if next.is_terminal() {
                self.finished_at.get_or_insert_with(Utc::now);
            }
            true
        } else {
            false
        }
    }

    /// Marks the start of a work attempt: `Running`, attempt count bumped,
    /// start timestamp set once. Returns the 1-based attempt number.
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        if self.advance(StageStatus::Running) {
            self.attempts += 1;
            self.started_at.get_or_insert_with(Utc::now);
        }
        self.attempts
    }

    pub(crate) fn succeed(&mut self, output: Value) {
        if self.advance(StageStatus::Succeeded) {
            self.output = Some(output);
        }
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        if self.advance(StageStatus::Failed) {
            self.error = Some(error.into());
        }
    }
}

/// Point-in-time view of one stage, as exposed by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    /// Current lifecycle status.
    pub status: StageStatus,
    /// Work-function attempts made so far.
    pub attempts: u32,
}

/// Point-in-time view of a whole run, queryable while the run progresses.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Coarse state of the run.
    pub run_state: RunState,
    /// Per-stage status and attempt counts.
    pub stages: HashMap<String, StageSnapshot>,
}

/// Live table of [`StageRun`] records, keyed by stage name.
///
/// Backed by a sharded concurrent map so each executor mutates its own
/// record under a per-entry lock while snapshot readers iterate the table
/// from other tasks.
#[derive(Debug, Default)]
pub struct RunTable {
    runs: DashMap<String, StageRun>,
}

impl RunTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a `Pending` record for every stage of the pipeline.
    pub(crate) fn initialize<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.runs.insert(name.to_string(), StageRun::new());
        }
    }

    /// Applies a status transition to one stage, if the lifecycle permits it.
    pub(crate) fn advance(&self, stage: &str, next: StageStatus) {
        if let Some(mut run) = self.runs.get_mut(stage) {
            if !run.advance(next) {
                debug!(stage, from = %run.status(), to = %next, "refused status transition");
            }
        }
    }

    /// Marks the start of a work attempt. Returns the 1-based attempt number.
    pub(crate) fn begin_attempt(&self, stage: &str) -> u32 {
        self.runs
            .get_mut(stage)
            .map_or(0, |mut run| run.begin_attempt())
    }

    pub(crate) fn succeed(&self, stage: &str, output: Value) {
        if let Some(mut run) = self.runs.get_mut(stage) {
            run.succeed(output);
        }
    }

    pub(crate) fn fail(&self, stage: &str, error: &str) {
        if let Some(mut run) = self.runs.get_mut(stage) {
            run.fail(error);
        }
    }

    /// The current status of one stage, if it exists in this run.
    #[must_use]
    pub fn status_of(&self, stage: &str) -> Option<StageStatus> {
        self.runs.get(stage).map(|run| run.status())
    }

    /// A cloned-out copy of one stage's record.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<StageRun> {
        self.runs.get(stage).map(|run| run.clone())
    }

    /// A cloned-out copy of every record, for end-of-run assembly.
    #[must_use]
    pub fn records(&self) -> HashMap<String, StageRun> {
        self.runs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Per-stage status and attempt counts, cheap enough for health polling.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, StageSnapshot> {
        self.runs
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    StageSnapshot {
                        status: entry.value().status(),
                        attempts: entry.value().attempts(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_run_starts_pending() {
        let run = StageRun::new();
        assert_eq!(run.status(), StageStatus::Pending);
        assert_eq!(run.attempts(), 0);
        assert!(run.started_at().is_none());
        assert!(run.output().is_none());
    }

    #[test]
    fn test_begin_attempt_sets_start_once() {
        let mut run = StageRun::new();
        assert!(run.advance(StageStatus::Ready));

        assert_eq!(run.begin_attempt(), 1);
        let first_start = run.started_at();
        assert!(first_start.is_some());

        assert!(run.advance(StageStatus::Retrying));
        assert_eq!(run.begin_attempt(), 2);
        assert_eq!(run.started_at(), first_start);
    }

    #[test]
    fn test_succeed_records_output_and_finish() {
        let mut run = StageRun::new();
        run.advance(StageStatus::Ready);
        run.begin_attempt();
        run.succeed(json!({"score": 7}));

        assert_eq!(run.status(), StageStatus::Succeeded);
        assert_eq!(run.output(), Some(&json!({"score": 7})));
        assert!(run.finished_at().is_some());
        assert!(run.duration().is_some());
    }

    #[test]
    fn test_terminal_record_refuses_regression() {
        let mut run = StageRun::new();
        run.advance(StageStatus::Ready);
        run.begin_attempt();
        run.succeed(json!(1));

        assert!(!run.advance(StageStatus::Running));
        assert!(!run.advance(StageStatus::Failed));
        assert_eq!(run.status(), StageStatus::Succeeded);
        assert_eq!(run.output(), Some(&json!(1)));
    }

    #[test]
    fn test_fail_records_error() {
        let mut run = StageRun::new();
        run.advance(StageStatus::Ready);
        run.begin_attempt();
        run.fail("backend unavailable");

        assert_eq!(run.status(), StageStatus::Failed);
        assert_eq!(run.error(), Some("backend unavailable"));
        assert!(run.output().is_none());
    }

    #[test]
    fn test_run_table_initialize_and_snapshot() {
        let table = RunTable::new();
        table.initialize(["parse", "score"]);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["parse"].status, StageStatus::Pending);
        assert_eq!(snapshot["score"].attempts, 0);
    }

    #[test]
    fn test_run_table_drives_one_stage() {
        let table = RunTable::new();
        table.initialize(["parse"]);

        table.advance("parse", StageStatus::Ready);
        assert_eq!(table.begin_attempt("parse"), 1);
        table.succeed("parse", json!("done"));

        let record = table.get("parse").unwrap();
        assert_eq!(record.status(), StageStatus::Succeeded);
        assert_eq!(record.attempts(), 1);
        assert_eq!(record.output(), Some(&json!("done")));
    }

    #[test]
    fn test_run_table_ignores_unknown_stage() {
        let table = RunTable::new();
        table.initialize(["parse"]);

        table.advance("missing", StageStatus::Ready);
        assert_eq!(table.begin_attempt("missing"), 0);
        assert!(table.status_of("missing").is_none());
    }

    #[test]
    fn test_run_table_refused_transition_leaves_record() {
        let table = RunTable::new();
        table.initialize(["parse"]);

        // Running without Ready first is a regression and must be refused.
        table.advance("parse", StageStatus::Running);
        assert_eq!(table.status_of("parse"), Some(StageStatus::Pending));
    }
}
