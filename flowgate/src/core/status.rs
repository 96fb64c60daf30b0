//! Stage and run status enums with the monotonic transition rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a stage within a run.
///
/// Transitions are monotonic: `Pending → Ready → Running`, then either
/// `Succeeded`, `Failed`, or a `Retrying ⇄ Running` loop while the retry
/// budget lasts. `Skipped` and `Cancelled` are the terminal states of stages
/// that never get to finish. A stage never reverts to `Ready` once started,
/// and terminal states absorb every further transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Waiting for dependencies to finish.
    Pending,
    /// Dependencies satisfied and launched, but not yet admitted by the pool.
    Ready,
    /// Work function executing under an admission permit.
    Running,
    /// Last attempt failed retryably; waiting out the backoff delay.
    Retrying,
    /// Terminal: the work function returned a value.
    Succeeded,
    /// Terminal: fatal error or retry budget exhausted.
    Failed,
    /// Terminal: never launched because an upstream stage failed.
    Skipped,
    /// Terminal: the run was cancelled before the stage could finish.
    Cancelled,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true when the monotonic lifecycle permits moving to `next`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready | Self::Skipped | Self::Cancelled)
                | (Self::Ready, Self::Running | Self::Cancelled)
                | (
                    Self::Running,
                    Self::Retrying | Self::Succeeded | Self::Failed | Self::Cancelled
                )
                | (Self::Retrying, Self::Running | Self::Cancelled)
        )
    }
}

/// The coarse state of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Context created, run not yet started.
    Initializing,
    /// Stages are being launched and executed.
    Running,
    /// Terminal: every stage succeeded.
    Completed,
    /// Terminal: a stage failed.
    Failed,
    /// Terminal: the run was cancelled.
    Cancelled,
}

impl Default for RunState {
    fn default() -> Self {
        Self::Initializing
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunState {
    /// Returns true if the run has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Pending.to_string(), "pending");
        assert_eq!(StageStatus::Retrying.to_string(), "retrying");
        assert_eq!(StageStatus::Succeeded.to_string(), "succeeded");
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Succeeded.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(StageStatus::Cancelled.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Ready.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(!StageStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_stage_status_happy_path_transitions() {
        assert!(StageStatus::Pending.can_advance_to(StageStatus::Ready));
        assert!(StageStatus::Ready.can_advance_to(StageStatus::Running));
        assert!(StageStatus::Running.can_advance_to(StageStatus::Succeeded));
    }

    #[test]
    fn test_stage_status_retry_loop_transitions() {
        assert!(StageStatus::Running.can_advance_to(StageStatus::Retrying));
        assert!(StageStatus::Retrying.can_advance_to(StageStatus::Running));
        assert!(StageStatus::Running.can_advance_to(StageStatus::Failed));
    }

    #[test]
    fn test_stage_status_never_reverts() {
        assert!(!StageStatus::Running.can_advance_to(StageStatus::Ready));
        assert!(!StageStatus::Running.can_advance_to(StageStatus::Pending));
        assert!(!StageStatus::Retrying.can_advance_to(StageStatus::Ready));
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [
            StageStatus::Succeeded,
            StageStatus::Failed,
            StageStatus::Skipped,
            StageStatus::Cancelled,
        ] {
            assert!(!terminal.can_advance_to(StageStatus::Running));
            assert!(!terminal.can_advance_to(StageStatus::Ready));
            assert!(!terminal.can_advance_to(StageStatus::Failed));
        }
    }

    #[test]
    fn test_stage_status_serialize() {
        let status = StageStatus::Succeeded;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#""succeeded""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Succeeded);
    }

    #[test]
    fn test_run_state_lifecycle() {
        assert_eq!(RunState::default(), RunState::Initializing);
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert_eq!(RunState::Running.to_string(), "running");
    }
}
