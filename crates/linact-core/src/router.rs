//! Inbound event router.
//!
//! Classifies decoded frames from the transport into [`InboundEvent`]s,
//! tracks the last known readings, and forwards events to the bus in
//! arrival order.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::command::ActuatorCommand;
use crate::event::{ControllerMode, InboundEvent, ReadingKind};
use crate::eventbus::EventBus;
use crate::frame::InboundFrame;

const DISTANCE_LABELS: &[&str] = &["Distancia actual", "Current distance"];
const SPEED_LABELS: &[&str] = &["Velocidad actual"];
const AUTO_DISABLED_NOTICES: &[&str] = &["Desactivando modo automático"];
const AUTO_ENABLED_NOTICES: &[&str] = &["Activando modo automático", "Auto mode activated"];
const MOTOR_STOPPED_NOTICES: &[&str] = &["Motor detenido", "Stopping manual motion"];
const PUMP_ON_NOTICES: &[&str] = &["Bomba de vacío encendida", "Vacuum pump ON"];
const PUMP_OFF_NOTICES: &[&str] = &["Bomba de vacío apagada", "Vacuum pump OFF"];
const CAPTURE_REQUEST: &str = "CAPTURE";

/// Micro sign (U+00B5), Greek mu (U+03BC) and ASCII spellings of µs.
const MICROSECOND_UNITS: &[&str] = &["µs", "μs", "us"];

/// Last successfully parsed readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LastReadings {
    pub distance_cm: Option<f64>,
    pub speed_us: Option<u32>,
}

/// Routes inbound frames to typed events.
pub struct InboundEventRouter {
    bus: EventBus,
    readings: RwLock<LastReadings>,
}

impl InboundEventRouter {
    /// Create a router publishing into `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            readings: RwLock::new(LastReadings::default()),
        }
    }

    /// Last known readings.
    pub fn last_readings(&self) -> LastReadings {
        *self.readings.read()
    }

    /// Classify, record and publish one frame.
    pub fn route(&self, frame: InboundFrame) -> InboundEvent {
        let event = classify(&frame);
        self.record(&event);
        log_event(&event);
        self.bus.publish("router", event.clone());
        event
    }

    /// Consume the transport's frame stream until it closes or `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        mut frames: mpsc::Receiver<InboundFrame>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => {
                            self.route(frame);
                        }
                        None => break,
                    },
                }
            }
            debug!("Inbound router stopped");
        })
    }

    fn record(&self, event: &InboundEvent) {
        match event {
            InboundEvent::Distance { value_cm } => {
                self.readings.write().distance_cm = Some(*value_cm);
            }
            InboundEvent::Speed { interval_us } => {
                self.readings.write().speed_us = Some(*interval_us);
            }
            _ => {}
        }
    }
}

/// Classify one frame. Pure; does not touch reading state.
pub fn classify(frame: &InboundFrame) -> InboundEvent {
    match frame {
        InboundFrame::Text(line) => classify_line(line),
        InboundFrame::Binary { code, payload } => match ActuatorCommand::from_opcode(*code, *payload) {
            Some(command) => InboundEvent::Acknowledged {
                command: Some(command),
                code: *code,
                payload: *payload,
            },
            None => InboundEvent::Unclassified {
                raw: frame.to_string(),
            },
        },
    }
}

fn classify_line(line: &str) -> InboundEvent {
    let contains_any = |needles: &[&str]| needles.iter().any(|n| line.contains(n));

    if contains_any(DISTANCE_LABELS) {
        return match parse_distance(line) {
            Ok(value_cm) => InboundEvent::Distance { value_cm },
            Err(reason) => parse_error(ReadingKind::Distance, line, reason),
        };
    }
    if contains_any(SPEED_LABELS) {
        return match parse_speed(line) {
            Ok(interval_us) => InboundEvent::Speed { interval_us },
            Err(reason) => parse_error(ReadingKind::Speed, line, reason),
        };
    }
    if contains_any(MOTOR_STOPPED_NOTICES) {
        return InboundEvent::ModeChanged(ControllerMode::MotorStopped);
    }
    // "Desactivando" must be checked before "Activando".
    if contains_any(AUTO_DISABLED_NOTICES) {
        return InboundEvent::ModeChanged(ControllerMode::AutoDisabled);
    }
    if contains_any(AUTO_ENABLED_NOTICES) {
        return InboundEvent::ModeChanged(ControllerMode::AutoEnabled);
    }
    if contains_any(PUMP_ON_NOTICES) {
        return InboundEvent::PumpState { on: true };
    }
    if contains_any(PUMP_OFF_NOTICES) {
        return InboundEvent::PumpState { on: false };
    }
    if line.trim() == CAPTURE_REQUEST {
        return InboundEvent::CaptureRequested;
    }
    InboundEvent::Unclassified {
        raw: line.to_string(),
    }
}

/// Text after the last `:` of a reading line.
fn reading_value(line: &str) -> &str {
    line.rsplit(':').next().unwrap_or(line).trim()
}

fn parse_distance(line: &str) -> Result<f64, String> {
    let value = reading_value(line);
    let number = value.strip_suffix("cm").unwrap_or(value).trim();
    let parsed: f64 = number.parse().map_err(|e| format!("{}: '{}'", e, number))?;
    if !parsed.is_finite() {
        return Err(format!("non-finite distance '{}'", number));
    }
    Ok(parsed)
}

fn parse_speed(line: &str) -> Result<u32, String> {
    let value = reading_value(line);
    let number = MICROSECOND_UNITS
        .iter()
        .find_map(|unit| value.strip_suffix(unit))
        .unwrap_or(value)
        .trim();
    number.parse().map_err(|e| format!("{}: '{}'", e, number))
}

fn parse_error(reading: ReadingKind, line: &str, reason: String) -> InboundEvent {
    InboundEvent::ParseError {
        reading,
        raw: line.to_string(),
        reason,
    }
}

fn log_event(event: &InboundEvent) {
    match event {
        InboundEvent::Distance { value_cm } => info!(value_cm, "Distance updated"),
        InboundEvent::Speed { interval_us } => info!(interval_us, "Speed updated"),
        InboundEvent::ModeChanged(mode) => info!(?mode, "Controller mode changed"),
        InboundEvent::PumpState { on } => info!(on, "Vacuum pump state acknowledged"),
        InboundEvent::Acknowledged { code, payload, .. } => {
            debug!(code, payload, "Binary acknowledgement")
        }
        InboundEvent::CaptureRequested => info!("Controller requested image capture"),
        InboundEvent::ParseError {
            reading,
            raw,
            reason,
        } => error!(?reading, raw = %raw, reason = %reason, "Failed to parse reading"),
        InboundEvent::Unclassified { raw } => info!(raw = %raw, "Received message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LinkEvent;

    fn text(line: &str) -> InboundFrame {
        InboundFrame::Text(line.to_string())
    }

    #[test]
    fn test_classify_readings() {
        assert_eq!(
            classify(&text("Distancia actual: 12.50 cm")),
            InboundEvent::Distance { value_cm: 12.5 }
        );
        assert_eq!(
            classify(&text("Current distance: 7.25 cm")),
            InboundEvent::Distance { value_cm: 7.25 }
        );
        assert_eq!(
            classify(&text("Velocidad actual: 800 μs")),
            InboundEvent::Speed { interval_us: 800 }
        );
        assert_eq!(
            classify(&text("Velocidad actual: 650 µs")),
            InboundEvent::Speed { interval_us: 650 }
        );
    }

    #[test]
    fn test_classify_notices() {
        assert_eq!(
            classify(&text("Motor detenido")),
            InboundEvent::ModeChanged(ControllerMode::MotorStopped)
        );
        assert_eq!(
            classify(&text("Activando modo automático")),
            InboundEvent::ModeChanged(ControllerMode::AutoEnabled)
        );
        assert_eq!(
            classify(&text("Desactivando modo automático")),
            InboundEvent::ModeChanged(ControllerMode::AutoDisabled)
        );
        assert_eq!(
            classify(&text("Bomba de vacío encendida.")),
            InboundEvent::PumpState { on: true }
        );
        assert_eq!(
            classify(&text("Vacuum pump OFF.")),
            InboundEvent::PumpState { on: false }
        );
        assert_eq!(classify(&text("CAPTURE")), InboundEvent::CaptureRequested);
        assert_eq!(
            classify(&text("Command received: UP")),
            InboundEvent::Unclassified {
                raw: "Command received: UP".to_string()
            }
        );
    }

    #[test]
    fn test_classify_parse_errors() {
        assert!(matches!(
            classify(&text("Distancia actual: abc cm")),
            InboundEvent::ParseError {
                reading: ReadingKind::Distance,
                ..
            }
        ));
        assert!(matches!(
            classify(&text("Distancia actual: NaN cm")),
            InboundEvent::ParseError { .. }
        ));
        assert!(matches!(
            classify(&text("Velocidad actual: 12.5 μs")),
            InboundEvent::ParseError {
                reading: ReadingKind::Speed,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_binary() {
        assert_eq!(
            classify(&InboundFrame::Binary {
                code: 0xA3,
                payload: 0
            }),
            InboundEvent::Acknowledged {
                command: Some(ActuatorCommand::Stop),
                code: 0xA3,
                payload: 0,
            }
        );
        assert_eq!(
            classify(&InboundFrame::Binary {
                code: 0x01,
                payload: 0x02
            }),
            InboundEvent::Unclassified {
                raw: "[0x01 0x02]".to_string()
            }
        );
    }

    #[test]
    fn test_parse_error_keeps_last_distance() {
        let router = InboundEventRouter::new(EventBus::new());

        router.route(text("Distancia actual: 12.50 cm"));
        assert_eq!(router.last_readings().distance_cm, Some(12.5));

        let event = router.route(text("Distancia actual: abc cm"));
        assert!(matches!(event, InboundEvent::ParseError { .. }));
        assert_eq!(router.last_readings().distance_cm, Some(12.5));
        assert_eq!(router.last_readings().speed_us, None);
    }

    #[tokio::test]
    async fn test_spawned_router_preserves_order() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let router = Arc::new(InboundEventRouter::new(bus));
        let (tx, rx) = mpsc::channel(16);
        let handle = router.clone().spawn(rx, CancellationToken::new());

        for line in ["Motor detenido", "Distancia actual: 3.0 cm", "hola"] {
            tx.send(text(line)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let received: Vec<LinkEvent> = events.drain();
        assert_eq!(
            received,
            vec![
                LinkEvent::Inbound(InboundEvent::ModeChanged(ControllerMode::MotorStopped)),
                LinkEvent::Inbound(InboundEvent::Distance { value_cm: 3.0 }),
                LinkEvent::Inbound(InboundEvent::Unclassified {
                    raw: "hola".to_string()
                }),
            ]
        );
        assert_eq!(router.last_readings().distance_cm, Some(3.0));
    }
}
