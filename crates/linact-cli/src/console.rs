//! Operator console input.
//!
//! One command per line:
//!
//! ```text
//! up | down | stop | auto | pump on | pump off | speed <us>
//! status | reconnect | help | quit
//! ```
//!
//! Actuator commands take an optional `@<priority>` suffix (1 = highest).

use linact_core::{ActuatorCommand, CommandPriority};

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Send {
        command: ActuatorCommand,
        priority: CommandPriority,
    },
    Status,
    Reconnect,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  up, down, stop, auto      move the actuator or toggle auto mode
  pump on | pump off        vacuum pump
  speed <us>                step interval in microseconds
  status                    link, dispatcher and health summary
  reconnect                 reconnect now, ignoring the attempt budget
  quit                      stop the motor and exit
Append @1..@5 to set the priority of an actuator command (default @1).";

/// Parse one line. `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (body, priority) = match line.rsplit_once('@') {
        Some((body, level)) => {
            let value: u8 = level
                .trim()
                .parse()
                .map_err(|_| format!("invalid priority '{}'", level.trim()))?;
            let priority = CommandPriority::from_value(value)
                .ok_or_else(|| format!("priority {} is outside 1-5", value))?;
            (body.trim(), Some(priority))
        }
        None => (line, None),
    };

    let lowered = body.to_ascii_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let command = match words.as_slice() {
        ["status"] => return control(ConsoleCommand::Status, priority),
        ["reconnect"] => return control(ConsoleCommand::Reconnect, priority),
        ["help"] | ["?"] => return control(ConsoleCommand::Help, priority),
        ["quit"] | ["exit"] => return control(ConsoleCommand::Quit, priority),
        ["up"] => ActuatorCommand::Up,
        ["down"] => ActuatorCommand::Down,
        ["stop"] => ActuatorCommand::Stop,
        ["auto"] => ActuatorCommand::Auto,
        ["pump", "on"] => ActuatorCommand::PumpOn,
        ["pump", "off"] => ActuatorCommand::PumpOff,
        ["speed", value] => {
            let interval: u32 = value
                .parse()
                .map_err(|_| format!("invalid speed '{}'", value))?;
            ActuatorCommand::SetSpeed(interval)
        }
        _ => return Err(format!("unknown command '{}', try 'help'", body)),
    };

    Ok(Some(ConsoleCommand::Send {
        command,
        priority: priority.unwrap_or_default(),
    }))
}

fn control(
    command: ConsoleCommand,
    priority: Option<CommandPriority>,
) -> Result<Option<ConsoleCommand>, String> {
    match priority {
        Some(_) => Err("priority only applies to actuator commands".to_string()),
        None => Ok(Some(command)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(command: ActuatorCommand, priority: CommandPriority) -> Option<ConsoleCommand> {
        Some(ConsoleCommand::Send { command, priority })
    }

    #[test]
    fn test_parse_actuator_commands() {
        assert_eq!(
            parse_line("up").unwrap(),
            send(ActuatorCommand::Up, CommandPriority::Highest)
        );
        assert_eq!(
            parse_line("  Pump ON ").unwrap(),
            send(ActuatorCommand::PumpOn, CommandPriority::Highest)
        );
        assert_eq!(
            parse_line("speed 800 @3").unwrap(),
            send(ActuatorCommand::SetSpeed(800), CommandPriority::Normal)
        );
        assert_eq!(
            parse_line("stop@5").unwrap(),
            send(ActuatorCommand::Stop, CommandPriority::Lowest)
        );
    }

    #[test]
    fn test_parse_control_commands() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("status").unwrap(), Some(ConsoleCommand::Status));
        assert_eq!(parse_line("EXIT").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(
            parse_line("reconnect").unwrap(),
            Some(ConsoleCommand::Reconnect)
        );
        assert!(parse_line("status @2").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("speed fast").is_err());
        assert!(parse_line("up @9").is_err());
        assert!(parse_line("up @x").is_err());
        assert!(parse_line("jump").is_err());
        assert!(parse_line("pump").is_err());
    }
}
