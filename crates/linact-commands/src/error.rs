//! Submission errors.

use linact_core::{ActuatorCommand, FaultKind};
use linact_transport::TransportError;

/// Why a submission was refused.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Submission throttled: {elapsed_ms} ms since the last accepted command")]
    Throttled { elapsed_ms: u64 },

    #[error("Command '{command}' is not supported by the transport: {source}")]
    Unsupported {
        command: ActuatorCommand,
        #[source]
        source: TransportError,
    },

    #[error("Dispatcher is stopped")]
    Closed,
}

impl SubmitError {
    /// Fault category, if the refusal is one.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            SubmitError::Throttled { .. } => Some(FaultKind::SubmissionThrottled),
            _ => None,
        }
    }
}
