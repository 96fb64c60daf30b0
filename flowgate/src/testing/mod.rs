//! Test doubles for exercising pipelines without real work functions.
//!
//! These stages are plain [`Stage`](crate::stages::Stage) implementations,
//! usable from downstream integration tests as well as this crate's own.

mod mocks;

pub use mocks::{
    ConcurrencyGauge, FailingStage, FlakyStage, RecordingStage, SleepStage, StubStage,
};
