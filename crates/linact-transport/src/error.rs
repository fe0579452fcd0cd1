//! Transport error types.

use linact_core::WireMode;

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Failed to open {address}: {source}")]
    Open {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command '{command}' cannot be encoded in {mode} mode")]
    Unsupported { command: String, mode: WireMode },

    #[error("Payload {value} of '{command}' does not fit in one byte")]
    PayloadOutOfRange { command: String, value: u32 },
}

impl TransportError {
    /// Whether the error comes from encoding rather than the link.
    /// Encoding errors are deterministic; retrying cannot help.
    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            TransportError::Unsupported { .. } | TransportError::PayloadOutOfRange { .. }
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
