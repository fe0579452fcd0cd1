//! Actuator command vocabulary.
//!
//! Defines the commands understood by the actuator controller, their
//! priorities, and the opcodes used by the binary wire encoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique command identifier.
pub type CommandId = String;

/// Binary opcode for `AUTO`.
pub const CMD_AUTO: u8 = 0xA0;
/// Binary opcode for `UP`.
pub const CMD_UP: u8 = 0xA1;
/// Binary opcode for `DOWN`.
pub const CMD_DOWN: u8 = 0xA2;
/// Binary opcode for `STOP`.
pub const CMD_STOP: u8 = 0xA3;
/// Binary opcode for `SET_SPEED`.
pub const CMD_SET_SPEED: u8 = 0xA4;

/// A command for the actuator controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActuatorCommand {
    /// Enable automatic up/down cycling.
    Auto,
    /// Continuous upward motion.
    Up,
    /// Continuous downward motion.
    Down,
    /// Stop all motion.
    Stop,
    /// Switch the vacuum pump on.
    PumpOn,
    /// Switch the vacuum pump off.
    PumpOff,
    /// Set the step pulse interval in microseconds.
    SetSpeed(u32),
    /// Opaque text forwarded verbatim.
    Raw(String),
}

impl ActuatorCommand {
    /// Text keyword for this command, without arguments.
    pub fn keyword(&self) -> &str {
        match self {
            ActuatorCommand::Auto => "AUTO",
            ActuatorCommand::Up => "UP",
            ActuatorCommand::Down => "DOWN",
            ActuatorCommand::Stop => "STOP",
            ActuatorCommand::PumpOn => "PUMP_ON",
            ActuatorCommand::PumpOff => "PUMP_OFF",
            ActuatorCommand::SetSpeed(_) => "SET_SPEED",
            ActuatorCommand::Raw(text) => text.as_str(),
        }
    }

    /// Binary opcode, if the command has one.
    pub fn opcode(&self) -> Option<u8> {
        match self {
            ActuatorCommand::Auto => Some(CMD_AUTO),
            ActuatorCommand::Up => Some(CMD_UP),
            ActuatorCommand::Down => Some(CMD_DOWN),
            ActuatorCommand::Stop => Some(CMD_STOP),
            ActuatorCommand::SetSpeed(_) => Some(CMD_SET_SPEED),
            ActuatorCommand::PumpOn | ActuatorCommand::PumpOff | ActuatorCommand::Raw(_) => None,
        }
    }

    /// Command for a binary opcode and payload.
    pub fn from_opcode(opcode: u8, payload: u8) -> Option<Self> {
        match opcode {
            CMD_AUTO => Some(ActuatorCommand::Auto),
            CMD_UP => Some(ActuatorCommand::Up),
            CMD_DOWN => Some(ActuatorCommand::Down),
            CMD_STOP => Some(ActuatorCommand::Stop),
            CMD_SET_SPEED => Some(ActuatorCommand::SetSpeed(u32::from(payload))),
            _ => None,
        }
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorCommand::SetSpeed(interval) => write!(f, "SET_SPEED {}", interval),
            other => f.write_str(other.keyword()),
        }
    }
}

impl FromStr for ActuatorCommand {
    type Err = std::convert::Infallible;

    /// Parses the text vocabulary case-insensitively, like the firmware.
    /// Anything unrecognised becomes [`ActuatorCommand::Raw`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut parts = trimmed.split_whitespace();
        let keyword = parts.next().unwrap_or_default().to_ascii_uppercase();
        let argument = parts.next();

        let command = match (keyword.as_str(), argument) {
            ("AUTO", None) => ActuatorCommand::Auto,
            ("UP", None) => ActuatorCommand::Up,
            ("DOWN", None) => ActuatorCommand::Down,
            ("STOP", None) => ActuatorCommand::Stop,
            ("PUMP_ON", None) => ActuatorCommand::PumpOn,
            ("PUMP_OFF", None) => ActuatorCommand::PumpOff,
            ("SET_SPEED", Some(value)) if parts.next().is_none() => match value.parse() {
                Ok(interval) => ActuatorCommand::SetSpeed(interval),
                Err(_) => ActuatorCommand::Raw(trimmed.to_string()),
            },
            _ => ActuatorCommand::Raw(trimmed.to_string()),
        };
        Ok(command)
    }
}

impl From<&str> for ActuatorCommand {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(command) => command,
            Err(never) => match never {},
        }
    }
}

/// Command priority levels. Lower values are dispatched first.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum CommandPriority {
    /// Operator actions and safety stops
    #[default]
    Highest = 1,
    /// Elevated
    High = 2,
    /// Regular operations
    Normal = 3,
    /// Background operations
    Low = 4,
    /// Retries of failed commands
    Lowest = 5,
}

impl CommandPriority {
    /// All priorities in dispatch order.
    pub const ALL: [CommandPriority; 5] = [
        CommandPriority::Highest,
        CommandPriority::High,
        CommandPriority::Normal,
        CommandPriority::Low,
        CommandPriority::Lowest,
    ];

    /// Get the priority value.
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Get priority from integer value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(CommandPriority::Highest),
            2 => Some(CommandPriority::High),
            3 => Some(CommandPriority::Normal),
            4 => Some(CommandPriority::Low),
            5 => Some(CommandPriority::Lowest),
            _ => None,
        }
    }

    /// Get the priority type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandPriority::Highest => "highest",
            CommandPriority::High => "high",
            CommandPriority::Normal => "normal",
            CommandPriority::Low => "low",
            CommandPriority::Lowest => "lowest",
        }
    }
}

impl fmt::Display for CommandPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vocabulary() {
        assert_eq!(ActuatorCommand::from("up"), ActuatorCommand::Up);
        assert_eq!(ActuatorCommand::from(" STOP "), ActuatorCommand::Stop);
        assert_eq!(ActuatorCommand::from("pump_on"), ActuatorCommand::PumpOn);
        assert_eq!(
            ActuatorCommand::from("SET_SPEED 800"),
            ActuatorCommand::SetSpeed(800)
        );
    }

    #[test]
    fn test_parse_unknown_is_raw() {
        assert_eq!(
            ActuatorCommand::from("SET_SPEED fast"),
            ActuatorCommand::Raw("SET_SPEED fast".to_string())
        );
        assert_eq!(
            ActuatorCommand::from("HOME"),
            ActuatorCommand::Raw("HOME".to_string())
        );
        assert_eq!(
            ActuatorCommand::from("UP now"),
            ActuatorCommand::Raw("UP now".to_string())
        );
    }

    #[test]
    fn test_display_matches_wire_text() {
        assert_eq!(ActuatorCommand::SetSpeed(1200).to_string(), "SET_SPEED 1200");
        assert_eq!(ActuatorCommand::PumpOff.to_string(), "PUMP_OFF");
        assert_eq!(ActuatorCommand::Raw("PING".into()).to_string(), "PING");
    }

    #[test]
    fn test_opcodes() {
        assert_eq!(ActuatorCommand::Stop.opcode(), Some(0xA3));
        assert_eq!(ActuatorCommand::PumpOn.opcode(), None);
        assert_eq!(
            ActuatorCommand::from_opcode(0xA4, 200),
            Some(ActuatorCommand::SetSpeed(200))
        );
        assert_eq!(ActuatorCommand::from_opcode(0x10, 0), None);
    }

    #[test]
    fn test_priority_order() {
        assert!(CommandPriority::Highest < CommandPriority::Lowest);
        assert_eq!(CommandPriority::from_value(5), Some(CommandPriority::Lowest));
        assert_eq!(CommandPriority::from_value(0), None);
        assert_eq!(CommandPriority::from_value(6), None);
        assert_eq!(CommandPriority::default().value(), 1);
    }
}
