//! Wire frame types shared by the transport and the inbound router.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire encoding used on the serial link. One per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    /// Newline-terminated UTF-8 lines.
    #[default]
    Text,
    /// Fixed two-byte frames: opcode then payload.
    Binary,
}

impl WireMode {
    /// Get the mode name.
    pub fn name(&self) -> &'static str {
        match self {
            WireMode::Text => "text",
            WireMode::Binary => "binary",
        }
    }
}

impl fmt::Display for WireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WireMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "line" => Ok(WireMode::Text),
            "binary" | "bin" => Ok(WireMode::Binary),
            other => Err(format!("unknown wire mode '{}'", other)),
        }
    }
}

/// A decoded frame received from the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundFrame {
    /// One text line, trimmed, without its terminator.
    Text(String),
    /// One binary frame.
    Binary {
        /// First byte of the frame
        code: u8,
        /// Second byte of the frame
        payload: u8,
    },
}

impl fmt::Display for InboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundFrame::Text(line) => f.write_str(line),
            InboundFrame::Binary { code, payload } => write!(f, "[{:#04x} {:#04x}]", code, payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_mode_parse() {
        assert_eq!("TEXT".parse::<WireMode>(), Ok(WireMode::Text));
        assert_eq!("binary".parse::<WireMode>(), Ok(WireMode::Binary));
        assert!("morse".parse::<WireMode>().is_err());
    }

    #[test]
    fn test_binary_frame_display() {
        let frame = InboundFrame::Binary {
            code: 0xA3,
            payload: 0,
        };
        assert_eq!(frame.to_string(), "[0xa3 0x00]");
    }
}
