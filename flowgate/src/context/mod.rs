//! Run input, dependency inputs and execution contexts.

mod execution;
mod inputs;
mod request;

pub use execution::{RunContext, StageContext};
pub use inputs::StageInputs;
pub use request::PipelineRequest;
