//! Shared worker runtime primitives for background analysis.
//!
//! * [`GenerationClock`] / [`GenerationToken`]: generation-stamped, one-way
//!   cancellation with a separate running flag and both blocking and async waits.
//! * [`WorkerPool`]: bounded blocking execution on a tokio runtime.
//! * [`JobTracker`]: named in-flight job accounting with a blocking idle wait.

mod panic;
mod pool;
mod token;

pub use panic::{TaskPanicked, join_error_message, panic_message};
pub use pool::{JobGuard, JobTracker, WorkerPool};
pub use token::{GenerationClock, GenerationToken};
