//! Error types for the flowgate engine.
//!
//! The taxonomy follows the run lifecycle: configuration errors surface at
//! build time before any stage runs, work errors classify a single attempt
//! of a stage's work function, and cancellation is a terminal condition of
//! its own rather than a failure.

use thiserror::Error;

/// The main error type for flowgate operations.
///
/// `Pipeline::run` returns this only for infrastructure faults (a panicked
/// stage task, a reused run context). Domain outcomes such as stage failure
/// or cancellation are reported through [`RunReport`](crate::pipeline::RunReport)
/// variants instead.
#[derive(Debug, Error)]
pub enum FlowgateError {
    /// Pipeline configuration was rejected at build time.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A work function accessed a dependency it never declared.
    #[error("{0}")]
    UndeclaredDependency(#[from] UndeclaredDependencyError),

    /// A blocked wait was interrupted by cancellation.
    #[error("{0}")]
    Cancelled(#[from] CancelledError),

    /// The run context was already consumed by an earlier run.
    #[error("run context already consumed by an earlier run")]
    RunAlreadyStarted,

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error raised when pipeline construction is rejected.
///
/// Raised by `PipelineBuilder::build` for empty pipelines, duplicate stage
/// names, self-dependencies, unknown dependency names and dependency cycles.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error raised when the stage graph contains a dependency cycle.
#[derive(Debug, Clone, Error)]
#[error("dependency cycle detected: {}", path.join(" -> "))]
pub struct CycleError {
    /// The stages forming the cycle, first stage repeated at the end.
    pub path: Vec<String>,
}

impl CycleError {
    /// Creates a new cycle error from the offending path.
    #[must_use]
    pub fn new(path: Vec<String>) -> Self {
        Self { path }
    }
}

impl From<CycleError> for ConfigError {
    fn from(err: CycleError) -> Self {
        let stages = err.path.clone();
        Self {
            message: err.to_string(),
            stages,
        }
    }
}

/// Error raised when a work function reads a dependency it did not declare.
#[derive(Debug, Clone, Error)]
#[error("undeclared dependency: stage '{stage}' attempted to read '{dependency}' which is not in its dependency set")]
pub struct UndeclaredDependencyError {
    /// The stage attempting access.
    pub stage: String,
    /// The dependency name that was not declared.
    pub dependency: String,
}

impl UndeclaredDependencyError {
    /// Creates a new undeclared dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            dependency: dependency.into(),
        }
    }
}

/// Error raised when a blocked wait observes cancellation.
///
/// Returned by `AdmissionPool::acquire` and the executor's backoff sleep.
/// Carries the first cancellation reason, if one was given.
#[derive(Debug, Clone, Default, Error)]
pub struct CancelledError {
    /// The reason passed to the first `cancel` call, if any.
    pub reason: Option<String>,
}

impl CancelledError {
    /// Creates a cancelled error with a reason.
    #[must_use]
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "run cancelled: {reason}"),
            None => write!(f, "run cancelled"),
        }
    }
}

/// Classified failure of a single work-function attempt.
///
/// Retryable errors are absorbed into the error aggregator and retried with
/// backoff until the attempt budget is spent; fatal errors fail the stage on
/// the spot.
#[derive(Debug, Clone, Error)]
pub enum WorkError {
    /// A transient failure; the executor may retry the attempt.
    #[error("retryable: {0}")]
    Retryable(String),

    /// A permanent failure; the stage fails without further attempts.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl WorkError {
    /// Creates a retryable work error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    /// Creates a fatal work error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns `true` when the executor is allowed to retry this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// The underlying message without the classification prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(message) | Self::Fatal(message) => message,
        }
    }
}

impl From<anyhow::Error> for WorkError {
    /// Unclassified application errors are treated as fatal. Work functions
    /// that want a retry must return [`WorkError::Retryable`] explicitly.
    fn from(err: anyhow::Error) -> Self {
        Self::Fatal(format!("{err:#}"))
    }
}
