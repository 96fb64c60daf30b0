//! Core run-state types shared across the engine.

pub mod run;
pub mod status;

pub use run::{RunTable, StageRun, StageSnapshot, StatusSnapshot};
pub use status::{RunState, StageStatus};
