//! Background task registry for tool calls promoted out of the request path.
//!
//! Lifecycle: `pending -> running -> completed | failed | timed_out`, with
//! `cancelled` reachable from either non-terminal state. Computations are
//! never paused; cancellation aborts the body at its next await point.

pub mod config;
pub mod error;
pub mod record;
pub mod registry;

pub use config::TasksConfig;
pub use error::TaskError;
pub use record::{CancelOutcome, TaskHandle, TaskRecord, TaskSpec, TaskStatus};
pub use registry::{TaskRegistry, TaskTicket};
pub use tokio_util::sync::CancellationToken;
