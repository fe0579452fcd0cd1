//! Command-line operator console for the linear actuator link.

mod console;
mod session;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linact_core::config::env_vars;
use linact_core::{EventBus, EventBusReceiver, LinkConfig, LinkEvent, Severity, WireMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::console::{parse_line, ConsoleCommand, HELP};
use crate::session::LinkSession;

/// Linear actuator link - drive the actuator over its serial controller.
#[derive(Parser, Debug)]
#[command(name = "linact")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and read operator commands from stdin.
    Run {
        /// Serial port, or "auto" to detect the controller.
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate.
        #[arg(short, long)]
        baud: Option<u32>,
        /// Wire encoding: text or binary.
        #[arg(short, long)]
        wire_mode: Option<WireMode>,
        /// Print events as JSON instead of text.
        #[arg(long)]
        json_events: bool,
    },
    /// List serial ports and mark the detected controller.
    Ports,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_json);

    match args.command {
        Command::Run {
            port,
            baud,
            wire_mode,
            json_events,
        } => {
            let mut config = load_config(args.config.as_ref())?;
            if let Some(port) = port {
                config.transport.port = port;
            }
            if let Some(baud) = baud {
                config.transport.baud_rate = baud;
            }
            if let Some(mode) = wire_mode {
                config.transport.wire_mode = mode;
            }
            config.validate()?;
            run(config, json_events).await
        }
        Command::Ports => list_ports(),
        Command::Config => {
            let config = load_config(args.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, log_json: bool) {
    let json_logging = log_json
        || std::env::var(env_vars::LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Defaults, then the config file, then `LINACT_*` overrides.
fn load_config(path: Option<&PathBuf>) -> Result<LinkConfig> {
    let mut config = match path {
        Some(path) => LinkConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => LinkConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn list_ports() -> Result<()> {
    let ports = linact_transport::available_ports().context("Failed to list serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    let controller = linact_transport::pick_controller_port(&ports).map(|p| p.name.clone());
    for port in &ports {
        let marker = if Some(&port.name) == controller.as_ref() {
            "*"
        } else {
            " "
        };
        match &port.description {
            Some(description) => println!("{} {}  ({})", marker, port.name, description),
            None => println!("{} {}", marker, port.name),
        }
    }
    Ok(())
}

async fn run(config: LinkConfig, json_events: bool) -> Result<()> {
    let bus = EventBus::with_capacity(config.events.capacity);
    let printer_cancel = CancellationToken::new();
    let printer = tokio::spawn(print_events(
        bus.subscribe(),
        json_events,
        printer_cancel.clone(),
    ));

    let session = LinkSession::open(config, bus).await;
    println!("Linear actuator link on {}", session.address());
    println!("Type 'help' for commands.\n");

    let result = console_loop(&session).await;

    session.shutdown().await;
    printer_cancel.cancel();
    let _ = printer.await;
    result
}

async fn console_loop(session: &LinkSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
            Ok(Some(ConsoleCommand::Help)) => println!("{}", HELP),
            Ok(Some(ConsoleCommand::Status)) => {
                println!("{}", serde_json::to_string_pretty(&session.status())?);
            }
            Ok(Some(ConsoleCommand::Reconnect)) => match session.reconnect().await {
                Ok(()) => println!("Reconnected."),
                Err(e) => println!("Reconnect failed: {}", e),
            },
            Ok(Some(ConsoleCommand::Send { command, priority })) => {
                if let Err(e) = session.submit(command, priority) {
                    println!("Rejected: {}", e);
                }
            }
            Err(e) => println!("{}", e),
        }
    }
}

async fn print_events(mut events: EventBusReceiver, json: bool, cancel: CancellationToken) {
    loop {
        let (event, meta) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = events.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
        if json {
            let line = serde_json::json!({
                "sequence": meta.sequence,
                "source": meta.source,
                "timestamp": meta.timestamp,
                "event": event,
            });
            println!("{}", line);
        } else if let Some(text) = describe(&event) {
            println!("[{}] {}", meta.source, text);
        }
    }
}

/// One-line operator text; `None` for events not worth printing.
fn describe(event: &LinkEvent) -> Option<String> {
    use linact_core::{DispatchEvent, HealthEvent, InboundEvent, TransportEvent};

    if event.severity() == Severity::Debug {
        return None;
    }
    let text = match event {
        LinkEvent::Inbound(InboundEvent::Distance { value_cm }) => {
            format!("distance {:.2} cm", value_cm)
        }
        LinkEvent::Inbound(InboundEvent::Speed { interval_us }) => {
            format!("speed {} us", interval_us)
        }
        LinkEvent::Inbound(InboundEvent::PumpState { on }) => {
            format!("vacuum pump {}", if *on { "on" } else { "off" })
        }
        LinkEvent::Inbound(InboundEvent::ParseError { raw, reason, .. }) => {
            format!("could not parse '{}': {}", raw, reason)
        }
        LinkEvent::Dispatch(DispatchEvent::Sent {
            command, priority, ..
        }) => format!("sent {} @{}", command, priority),
        LinkEvent::Dispatch(DispatchEvent::Throttled { command }) => {
            format!("{} rejected, too soon after the previous command", command)
        }
        LinkEvent::Dispatch(DispatchEvent::RetryScheduled {
            command,
            error_count,
            ..
        }) => format!("retrying {} (errors: {})", command, error_count),
        LinkEvent::Transport(TransportEvent::Connected { address, mode }) => {
            format!("connected to {} ({})", address, mode)
        }
        LinkEvent::Transport(TransportEvent::Disconnected { address }) => {
            format!("disconnected from {}", address)
        }
        LinkEvent::Health(HealthEvent::ReconnectFailed {
            attempt,
            max_attempts,
            reason,
        }) => format!("reconnect {}/{} failed: {}", attempt, max_attempts, reason),
        LinkEvent::Health(HealthEvent::ReconnectExhausted { attempts }) => format!(
            "gave up after {} reconnect attempts, use 'reconnect' to retry",
            attempts
        ),
        LinkEvent::Inbound(other) => format!("{:?}", other),
        LinkEvent::Dispatch(other) => format!("{:?}", other),
        LinkEvent::Transport(other) => format!("{:?}", other),
        LinkEvent::Health(other) => format!("{:?}", other),
    };
    match event.fault_kind() {
        Some(kind) => Some(format!("{}: {}", kind, text)),
        None => Some(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linact_core::{ActuatorCommand, DispatchEvent, InboundEvent, ReadingKind};

    #[test]
    fn test_describe_readings_and_faults() {
        let distance = LinkEvent::from(InboundEvent::Distance { value_cm: 12.5 });
        assert_eq!(describe(&distance).unwrap(), "distance 12.50 cm");

        let throttled = LinkEvent::from(DispatchEvent::Throttled {
            command: ActuatorCommand::Up,
        });
        let text = describe(&throttled).unwrap();
        assert!(text.contains("UP rejected"));
        assert!(text.starts_with(&linact_core::FaultKind::SubmissionThrottled.to_string()));

        let parse = LinkEvent::from(InboundEvent::ParseError {
            reading: ReadingKind::Distance,
            raw: "Distancia actual: abc cm".to_string(),
            reason: "invalid float literal".to_string(),
        });
        assert!(describe(&parse).unwrap().contains("abc"));
    }

    #[test]
    fn test_describe_skips_debug_events() {
        let unclassified = LinkEvent::from(InboundEvent::Unclassified {
            raw: "Command received: UP".to_string(),
        });
        assert!(describe(&unclassified).is_none());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "linact", "run", "--port", "/dev/ttyUSB0", "--wire-mode", "binary", "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Run {
                port, wire_mode, ..
            } => {
                assert_eq!(port.as_deref(), Some("/dev/ttyUSB0"));
                assert_eq!(wire_mode, Some(WireMode::Binary));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
