//! Transport link.
//!
//! [`SerialLink`] owns the channel to the controller. Writes are serialized
//! by one async lock. A background reader polls the channel, decodes frames
//! with the link's codec and forwards them in arrival order. A read error
//! marks the link disconnected and ends the reader; only an explicit
//! [`Transport::connect`] starts a new one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linact_core::{ActuatorCommand, EventBus, InboundFrame, TransportEvent, WireMode};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelOpener, SerialChannel};
use crate::codec::FrameCodec;
use crate::error::{TransportError, TransportResult};

const EVENT_SOURCE: &str = "transport";

/// Command sink towards the controller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Encoding used on the wire.
    fn wire_mode(&self) -> WireMode;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Check that `command` can be encoded, without sending anything.
    fn check_encodable(&self, command: &ActuatorCommand) -> TransportResult<()>;

    /// Open the channel at `address`, replacing any existing connection.
    async fn connect(&self, address: &str) -> TransportResult<()>;

    /// Stop the reader and release the channel. Idempotent.
    async fn disconnect(&self);

    /// Encode and write one command.
    async fn send(&self, command: &ActuatorCommand) -> TransportResult<()>;
}

struct ReaderHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct LinkState {
    channel: Option<Arc<dyn SerialChannel>>,
    connected: bool,
    address: Option<String>,
    /// Bumped on every successful connect so an old reader cannot mark a
    /// newer connection down.
    generation: u64,
    reader: Option<ReaderHandle>,
}

struct LinkShared<C> {
    codec: C,
    opener: Arc<dyn ChannelOpener>,
    bus: EventBus,
    inbound: mpsc::Sender<InboundFrame>,
    poll_interval: Duration,
    state: Mutex<LinkState>,
    /// Single writer
    write_lock: tokio::sync::Mutex<()>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
}

impl<C: FrameCodec> LinkShared<C> {
    /// Mark the link down if `generation` is still current.
    /// Returns the address that went down.
    fn mark_down(&self, generation: u64) -> Option<String> {
        let mut state = self.state.lock();
        if state.generation != generation || !state.connected {
            return None;
        }
        state.connected = false;
        state.address.clone()
    }
}

/// Serial link generic over its wire codec.
pub struct SerialLink<C> {
    shared: Arc<LinkShared<C>>,
}

impl<C: FrameCodec> SerialLink<C> {
    /// Create a disconnected link.
    ///
    /// Returns the link and the receiving end of its inbound frame stream.
    /// The stream outlives reconnects and closes when the link is dropped.
    pub fn new(
        codec: C,
        opener: Arc<dyn ChannelOpener>,
        bus: EventBus,
        poll_interval: Duration,
        inbound_capacity: usize,
    ) -> (Self, mpsc::Receiver<InboundFrame>) {
        let (inbound, frames) = mpsc::channel(inbound_capacity.max(1));
        let shared = Arc::new(LinkShared {
            codec,
            opener,
            bus,
            inbound,
            poll_interval,
            state: Mutex::new(LinkState::default()),
            write_lock: tokio::sync::Mutex::new(()),
            lifecycle: tokio::sync::Mutex::new(()),
        });
        (Self { shared }, frames)
    }

    /// Address of the current or last attempted connection.
    pub fn address(&self) -> Option<String> {
        self.shared.state.lock().address.clone()
    }

    /// Cancel and join the reader, then close the channel.
    /// Returns the address if the link was up.
    async fn teardown(&self) -> Option<String> {
        let (reader, channel, was_up, address) = {
            let mut state = self.shared.state.lock();
            let was_up = state.connected;
            state.connected = false;
            (
                state.reader.take(),
                state.channel.take(),
                was_up,
                state.address.clone(),
            )
        };
        if let Some(reader) = reader {
            reader.cancel.cancel();
            if let Err(e) = reader.handle.await {
                warn!(error = %e, "Reader task ended abnormally");
            }
        }
        if let Some(channel) = channel {
            channel.close().await;
        }
        if was_up {
            address
        } else {
            None
        }
    }
}

#[async_trait]
impl<C: FrameCodec> Transport for SerialLink<C> {
    fn wire_mode(&self) -> WireMode {
        self.shared.codec.mode()
    }

    fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    fn check_encodable(&self, command: &ActuatorCommand) -> TransportResult<()> {
        self.shared.codec.encode(command).map(|_| ())
    }

    async fn connect(&self, address: &str) -> TransportResult<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if let Some(previous) = self.teardown().await {
            debug!(address = %previous, "Closed previous connection before reconnecting");
        }

        match self.shared.opener.open(address).await {
            Ok(channel) => {
                let cancel = CancellationToken::new();
                let generation = {
                    let mut state = self.shared.state.lock();
                    state.generation += 1;
                    state.channel = Some(channel.clone());
                    state.connected = true;
                    state.address = Some(address.to_string());
                    state.generation
                };
                let handle = tokio::spawn(read_loop(
                    self.shared.clone(),
                    channel,
                    generation,
                    cancel.clone(),
                ));
                self.shared.state.lock().reader = Some(ReaderHandle { cancel, handle });

                let mode = self.shared.codec.mode();
                info!(address, %mode, "Connected");
                self.shared.bus.publish(
                    EVENT_SOURCE,
                    TransportEvent::Connected {
                        address: address.to_string(),
                        mode,
                    },
                );
                Ok(())
            }
            Err(source) => {
                self.shared.state.lock().address = Some(address.to_string());
                error!(address, error = %source, "Failed to connect");
                self.shared.bus.publish(
                    EVENT_SOURCE,
                    TransportEvent::ConnectFailed {
                        address: address.to_string(),
                        reason: source.to_string(),
                    },
                );
                Err(TransportError::Open {
                    address: address.to_string(),
                    source,
                })
            }
        }
    }

    async fn disconnect(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if let Some(address) = self.teardown().await {
            info!(address = %address, "Disconnected");
            self.shared
                .bus
                .publish(EVENT_SOURCE, TransportEvent::Disconnected { address });
        }
    }

    async fn send(&self, command: &ActuatorCommand) -> TransportResult<()> {
        let frame = self.shared.codec.encode(command)?;

        let _writer = self.shared.write_lock.lock().await;
        let (channel, generation) = {
            let state = self.shared.state.lock();
            match (&state.channel, state.connected) {
                (Some(channel), true) => (channel.clone(), state.generation),
                _ => return Err(TransportError::NotConnected),
            }
        };

        match channel.write_all(&frame).await {
            Ok(()) => {
                debug!(%command, bytes = frame.len(), "Frame written");
                Ok(())
            }
            Err(e) => {
                if let Some(address) = self.shared.mark_down(generation) {
                    error!(address = %address, %command, error = %e, "Write failed, link marked down");
                    self.shared.bus.publish(
                        EVENT_SOURCE,
                        TransportEvent::WriteFault {
                            address,
                            reason: e.to_string(),
                        },
                    );
                }
                Err(TransportError::Io(e))
            }
        }
    }
}

async fn read_loop<C: FrameCodec>(
    shared: Arc<LinkShared<C>>,
    channel: Arc<dyn SerialChannel>,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut buffer = Vec::new();
    let mut ticker = tokio::time::interval(shared.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'reading: loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let bytes = match channel.read_available().await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Some(address) = shared.mark_down(generation) {
                    error!(address = %address, error = %e, "Read failed, link marked down");
                    shared.bus.publish(
                        EVENT_SOURCE,
                        TransportEvent::ReadLoopFault {
                            address,
                            reason: e.to_string(),
                        },
                    );
                }
                break;
            }
        };
        if bytes.is_empty() {
            continue;
        }

        buffer.extend_from_slice(&bytes);
        for frame in shared.codec.decode(&mut buffer) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'reading,
                sent = shared.inbound.send(frame) => {
                    if sent.is_err() {
                        debug!("Inbound frame receiver dropped");
                    }
                }
            }
        }
    }
    debug!(generation, "Reader stopped");
}
