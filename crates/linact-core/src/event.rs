//! Events published by the link layer.
//!
//! Everything observable about the link (decoded controller messages,
//! command lifecycle, transport state, health) is one [`LinkEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{ActuatorCommand, CommandId, CommandPriority};
use crate::error::FaultKind;
use crate::frame::WireMode;

/// Severity used by subscribers when presenting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Reading reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadingKind {
    /// Ultrasonic distance in centimetres
    Distance,
    /// Step pulse interval in microseconds
    Speed,
}

/// Mode notices originating from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerMode {
    AutoEnabled,
    AutoDisabled,
    MotorStopped,
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InboundEvent {
    /// Distance reading update
    Distance { value_cm: f64 },
    /// Speed reading update
    Speed { interval_us: u32 },
    /// Controller changed mode
    ModeChanged(ControllerMode),
    /// Vacuum pump acknowledgement
    PumpState { on: bool },
    /// Binary echo/acknowledgement of a command
    Acknowledged {
        command: Option<ActuatorCommand>,
        code: u8,
        payload: u8,
    },
    /// Controller asks for an image capture
    CaptureRequested,
    /// Reading update whose value did not parse
    ParseError {
        reading: ReadingKind,
        raw: String,
        reason: String,
    },
    /// Anything else
    Unclassified { raw: String },
}

/// Command lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchEvent {
    /// Accepted by submit and queued
    Queued {
        id: CommandId,
        command: ActuatorCommand,
        priority: CommandPriority,
    },
    /// Rejected by the submission throttle
    Throttled { command: ActuatorCommand },
    /// Handed to the transport successfully
    Sent {
        id: CommandId,
        command: ActuatorCommand,
        priority: CommandPriority,
    },
    /// Transport send failed
    SendFailed {
        id: CommandId,
        command: ActuatorCommand,
        error_count: u32,
        reason: String,
    },
    /// Failed command re-queued, bypassing the throttle
    RetryScheduled {
        id: CommandId,
        retry_of: CommandId,
        command: ActuatorCommand,
        priority: CommandPriority,
        error_count: u32,
    },
    /// Failed command abandoned
    RetryLimitExceeded {
        id: CommandId,
        command: ActuatorCommand,
        error_count: u32,
    },
    /// Evicted at dequeue time without being sent
    StaleCommandDiscarded {
        id: CommandId,
        command: ActuatorCommand,
        age_ms: u64,
    },
}

/// Transport state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportEvent {
    Connected { address: String, mode: WireMode },
    ConnectFailed { address: String, reason: String },
    Disconnected { address: String },
    /// Reader loop stopped on an I/O error; the link is down
    ReadLoopFault { address: String, reason: String },
    /// A write failed; the link is down
    WriteFault { address: String, reason: String },
}

/// Snapshot published on every health tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub score: f64,
    pub connected: bool,
    pub error_count: u32,
    pub reconnect_attempts: u32,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Health monitor events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthEvent {
    /// CPU or memory above threshold
    ResourceWarning {
        cpu_percent: f64,
        memory_percent: f64,
        score: f64,
    },
    /// Error counter breached the threshold; recovery starts
    RecoveryStarted { error_count: u32 },
    /// Recovery finished
    RecoverySucceeded { score: f64, stop_accepted: bool },
    /// Reconnect succeeded
    LinkRestored { address: String },
    /// Reconnect failed
    ReconnectFailed {
        attempt: u32,
        max_attempts: u32,
        reason: String,
    },
    /// Reconnect budget spent; no further attempts
    ReconnectExhausted { attempts: u32 },
    /// Periodic snapshot
    Report(HealthReport),
}

/// Any event published by the link layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkEvent {
    Inbound(InboundEvent),
    Dispatch(DispatchEvent),
    Transport(TransportEvent),
    Health(HealthEvent),
}

impl LinkEvent {
    /// Fault category, if the event reports a fault.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            LinkEvent::Inbound(InboundEvent::ParseError { .. }) => Some(FaultKind::ParseError),
            LinkEvent::Dispatch(DispatchEvent::Throttled { .. }) => {
                Some(FaultKind::SubmissionThrottled)
            }
            LinkEvent::Dispatch(DispatchEvent::SendFailed { .. }) => Some(FaultKind::SendFailure),
            LinkEvent::Dispatch(DispatchEvent::RetryLimitExceeded { .. }) => {
                Some(FaultKind::RetryLimitExceeded)
            }
            LinkEvent::Dispatch(DispatchEvent::StaleCommandDiscarded { .. }) => {
                Some(FaultKind::StaleCommandDiscarded)
            }
            LinkEvent::Transport(TransportEvent::ReadLoopFault { .. }) => {
                Some(FaultKind::ReadLoopFault)
            }
            LinkEvent::Transport(TransportEvent::ConnectFailed { .. })
            | LinkEvent::Transport(TransportEvent::WriteFault { .. })
            | LinkEvent::Health(HealthEvent::ReconnectFailed { .. })
            | LinkEvent::Health(HealthEvent::ReconnectExhausted { .. }) => {
                Some(FaultKind::TransportDisconnected)
            }
            _ => None,
        }
    }

    /// Presentation severity.
    pub fn severity(&self) -> Severity {
        match self {
            LinkEvent::Inbound(InboundEvent::ParseError { .. }) => Severity::Error,
            LinkEvent::Inbound(InboundEvent::Unclassified { .. }) => Severity::Debug,
            LinkEvent::Inbound(_) => Severity::Info,
            LinkEvent::Dispatch(DispatchEvent::Throttled { .. })
            | LinkEvent::Dispatch(DispatchEvent::StaleCommandDiscarded { .. })
            | LinkEvent::Dispatch(DispatchEvent::RetryScheduled { .. }) => Severity::Warning,
            LinkEvent::Dispatch(DispatchEvent::SendFailed { .. })
            | LinkEvent::Dispatch(DispatchEvent::RetryLimitExceeded { .. }) => Severity::Error,
            LinkEvent::Dispatch(_) => Severity::Debug,
            LinkEvent::Transport(TransportEvent::Connected { .. })
            | LinkEvent::Transport(TransportEvent::Disconnected { .. }) => Severity::Info,
            LinkEvent::Transport(_) => Severity::Error,
            LinkEvent::Health(HealthEvent::ResourceWarning { .. })
            | LinkEvent::Health(HealthEvent::RecoveryStarted { .. }) => Severity::Warning,
            LinkEvent::Health(HealthEvent::ReconnectFailed { .. })
            | LinkEvent::Health(HealthEvent::ReconnectExhausted { .. }) => Severity::Error,
            LinkEvent::Health(HealthEvent::Report(_)) => Severity::Debug,
            LinkEvent::Health(_) => Severity::Info,
        }
    }
}

impl From<InboundEvent> for LinkEvent {
    fn from(event: InboundEvent) -> Self {
        LinkEvent::Inbound(event)
    }
}

impl From<DispatchEvent> for LinkEvent {
    fn from(event: DispatchEvent) -> Self {
        LinkEvent::Dispatch(event)
    }
}

impl From<TransportEvent> for LinkEvent {
    fn from(event: TransportEvent) -> Self {
        LinkEvent::Transport(event)
    }
}

impl From<HealthEvent> for LinkEvent {
    fn from(event: HealthEvent) -> Self {
        LinkEvent::Health(event)
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Monotonic publication order
    pub sequence: u64,
    /// Component that published the event
    pub source: String,
    /// Publication time
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(sequence: u64, source: impl Into<String>) -> Self {
        Self {
            sequence,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}
