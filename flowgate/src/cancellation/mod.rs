//! Cooperative cancellation primitives.
//!
//! A single [`CancellationToken`] is shared by the run context, the admission
//! pool and every stage executor of a run. Cancellation is observed at each
//! blocked wait and between attempts; it is never treated as a stage failure.

mod token;

pub use token::CancellationToken;
