//! Serial transport for the linear actuator controller.
//!
//! Provides:
//! - Text and binary wire codecs
//! - The [`Transport`] trait and the serial [`SerialLink`]
//! - Serial port discovery
//! - In-memory doubles behind the `mock` feature

pub mod channel;
pub mod codec;
pub mod error;
pub mod link;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use std::sync::Arc;

use linact_core::{EventBus, InboundFrame, TransportConfig, WireMode};
use tokio::sync::mpsc;

pub use channel::{
    available_ports, pick_controller_port, resolve_port, ChannelOpener, PortCandidate,
    SerialChannel, SerialPortChannel, SerialPortOpener,
};
pub use codec::{BinaryCodec, FrameCodec, LineCodec};
pub use error::{TransportError, TransportResult};
pub use link::{SerialLink, Transport};

/// Build a disconnected link for the configured wire mode over real serial ports.
pub fn serial_transport(
    config: &TransportConfig,
    bus: EventBus,
) -> (Arc<dyn Transport>, mpsc::Receiver<InboundFrame>) {
    build_transport(config, Arc::new(SerialPortOpener::from_config(config)), bus)
}

/// Build a disconnected link for the configured wire mode over `opener`.
pub fn build_transport(
    config: &TransportConfig,
    opener: Arc<dyn ChannelOpener>,
    bus: EventBus,
) -> (Arc<dyn Transport>, mpsc::Receiver<InboundFrame>) {
    let poll = config.read_poll_interval();
    let capacity = config.inbound_capacity;
    match config.wire_mode {
        WireMode::Text => {
            let (link, frames) = SerialLink::new(LineCodec, opener, bus, poll, capacity);
            (Arc::new(link), frames)
        }
        WireMode::Binary => {
            let (link, frames) = SerialLink::new(BinaryCodec, opener, bus, poll, capacity);
            (Arc::new(link), frames)
        }
    }
}
