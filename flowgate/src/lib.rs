//! # Flowgate
//!
//! A dependency-aware pipeline engine with bounded concurrent admission.
//!
//! Flowgate runs multi-stage workloads as a directed acyclic graph with
//! support for:
//!
//! - **Stage graphs**: declare stages, dependencies and per-stage retry policies
//! - **Bounded admission**: a shared permit pool caps how many stages work at once
//! - **Retry with backoff**: transient failures are absorbed and retried with exponential delays
//! - **Progress reporting**: a bounded, ordered stream of per-stage updates that never blocks a stage
//! - **Cooperative cancellation**: observable at every wait point, with permits released on all paths
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowgate::prelude::*;
//!
//! // Assemble a validated stage graph
//! let pipeline = PipelineBuilder::new("enrichment")
//!     .stage("fetch", Arc::new(FetchStage::new()), &[])
//!     .stage("parse", Arc::new(ParseStage::new()), &["fetch"])
//!     .stage("publish", Arc::new(PublishStage::new()), &["parse"])
//!     .with_admission_capacity(4)
//!     .build()?;
//!
//! // Run it with a fresh context
//! let ctx = Arc::new(RunContext::new(PipelineRequest::new(seed)));
//! let report = pipeline.run(ctx, ExecutionStrategy::Concurrent).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod admission;
pub mod cancellation;
pub mod context;
pub mod core;
pub mod errors;
pub mod failures;
pub mod pipeline;
pub mod progress;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::admission::{AdmissionPool, Permit, DEFAULT_ADMISSION_CAPACITY};
    pub use crate::cancellation::CancellationToken;
    pub use crate::context::{PipelineRequest, RunContext, StageContext, StageInputs};
    pub use crate::core::{
        RunState, StageRun, StageSnapshot, StageStatus, StatusSnapshot,
    };
    pub use crate::errors::{
        CancelledError, ConfigError, CycleError, FlowgateError,
        UndeclaredDependencyError, WorkError,
    };
    pub use crate::failures::{AbsorbedError, ErrorAggregator};
    pub use crate::pipeline::{
        CancellationReport, ExecutionStrategy, FailurePolicy, FailureReport,
        Pipeline, PipelineBuilder, PipelineResult, RetryPolicy, RunReport,
        StageSpec, StageTiming,
    };
    pub use crate::progress::{ProgressReporter, ProgressStream, ProgressUpdate};
    pub use crate::stages::{FnStage, NoOpStage, Stage};
}
