//! Core types for the linear actuator link.
//!
//! Provides:
//! - Command vocabulary and priorities
//! - Wire frame types
//! - Link events and the event bus
//! - Inbound event classification
//! - Configuration and the fault taxonomy

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod frame;
pub mod router;

pub use command::{ActuatorCommand, CommandId, CommandPriority};
pub use config::{DispatcherConfig, EventsConfig, HealthConfig, LinkConfig, TransportConfig};
pub use error::{ConfigError, FaultKind};
pub use event::{
    ControllerMode, DispatchEvent, EventMetadata, HealthEvent, HealthReport, InboundEvent,
    LinkEvent, ReadingKind, Severity, TransportEvent,
};
pub use eventbus::{EventBus, EventBusReceiver, DEFAULT_CHANNEL_CAPACITY};
pub use frame::{InboundFrame, WireMode};
pub use router::{InboundEventRouter, LastReadings};
