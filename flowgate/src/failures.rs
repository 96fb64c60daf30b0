//! Absorbed-error log for failures the run survived.
//!
//! Retryable attempt failures are recorded here and the run moves on; the
//! log never decides pass/fail. Whatever it holds at the end of a run is
//! attached to the terminal report, successful or not, so transient trouble
//! stays visible after the fact.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A retryable attempt failure the run absorbed instead of aborting on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsorbedError {
    /// Stage whose attempt failed.
    pub stage: String,
    /// 1-based attempt number that failed.
    pub attempt: u32,
    /// Error message of the failed attempt.
    pub error: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl AbsorbedError {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(stage: impl Into<String>, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only log of absorbed errors, safe for concurrent writers.
///
/// Stage executors of a run append from their own tasks; order within one
/// stage follows its attempt order.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    entries: RwLock<Vec<AbsorbedError>>,
}

impl ErrorAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one absorbed error.
    pub fn record(&self, stage: &str, attempt: u32, error: impl Into<String>) {
        self.entries
            .write()
            .push(AbsorbedError::new(stage, attempt, error));
    }

    /// A cloned-out copy of every entry, in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<AbsorbedError> {
        self.entries.read().clone()
    }

    /// Entries recorded for one stage, in attempt order.
    #[must_use]
    pub fn entries_for(&self, stage: &str) -> Vec<AbsorbedError> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.stage == stage)
            .cloned()
            .collect()
    }

    /// Number of absorbed errors so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing has been absorbed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
