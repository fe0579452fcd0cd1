//! Fault taxonomy and configuration errors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of every fault the link layer can observe.
///
/// None of these terminates the process. Each is logged where it happens
/// and surfaced to subscribers as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Submit rejected by the throttle. Not an error, no side effect.
    SubmissionThrottled,
    /// Command evicted at dequeue time because it was too old.
    StaleCommandDiscarded,
    /// Transport send failed; triggers bounded retry.
    SendFailure,
    /// Retry budget spent; the command is abandoned.
    RetryLimitExceeded,
    /// Link is down; drives the reconnect state machine.
    TransportDisconnected,
    /// Reading update with an unparsable value.
    ParseError,
    /// Reader loop hit an I/O error and stopped.
    ReadLoopFault,
}

impl FaultKind {
    /// Get the fault name.
    pub fn name(&self) -> &'static str {
        match self {
            FaultKind::SubmissionThrottled => "submission_throttled",
            FaultKind::StaleCommandDiscarded => "stale_command_discarded",
            FaultKind::SendFailure => "send_failure",
            FaultKind::RetryLimitExceeded => "retry_limit_exceeded",
            FaultKind::TransportDisconnected => "transport_disconnected",
            FaultKind::ParseError => "parse_error",
            FaultKind::ReadLoopFault => "read_loop_fault",
        }
    }

    /// Whether the fault ends the life of a single command.
    pub fn is_terminal_for_command(&self) -> bool {
        matches!(
            self,
            FaultKind::StaleCommandDiscarded | FaultKind::RetryLimitExceeded
        )
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
