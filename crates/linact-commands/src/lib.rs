//! Command dispatch for the actuator link.
//!
//! Provides:
//! - Queued command records
//! - Priority queue with FIFO order within a priority
//! - Submission throttle and send-error counter
//! - The command dispatcher and its worker

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod throttle;

pub use command::{Command, CommandSource};
pub use dispatcher::{CommandDispatcher, DispatchOutcome, DispatcherStats};
pub use error::SubmitError;
pub use queue::{DispatchQueue, QueueStats};
pub use throttle::{ErrorCounter, ThrottleState};
