//! Pipeline assembly and execution.
//!
//! This module provides:
//! - Stage specifications and retry policies
//! - A builder with build-time graph validation
//! - Sequential and concurrent run strategies
//! - Structured run reports

mod builder;
mod driver;
mod executor;
mod report;
mod retry;
mod spec;

pub use builder::PipelineBuilder;
pub use driver::{ExecutionStrategy, FailurePolicy, Pipeline};
pub use report::{
    CancellationReport, FailureReport, PipelineResult, RunReport, StageTiming,
};
pub use retry::RetryPolicy;
pub use spec::StageSpec;
