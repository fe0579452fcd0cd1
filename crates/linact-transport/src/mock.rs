//! Test doubles.
//!
//! [`MockOpener`]/[`MockChannel`] stand in for the serial port underneath a
//! real [`SerialLink`](crate::SerialLink). [`MockTransport`] replaces the
//! whole link for dispatcher and health tests and records every send.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linact_core::{ActuatorCommand, WireMode};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::channel::{ChannelOpener, SerialChannel};
use crate::codec::{BinaryCodec, FrameCodec, LineCodec};
use crate::error::{TransportError, TransportResult};
use crate::link::Transport;

#[derive(Default)]
struct ChannelState {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
    closed: bool,
}

/// In-memory channel with injectable inbound bytes and faults.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the next read.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.lock().inbound.push_back(bytes.to_vec());
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn reopen(&self) {
        self.state.lock().closed = false;
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")
}

#[async_trait]
impl SerialChannel for MockChannel {
    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed || state.fail_writes {
            return Err(broken_pipe());
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    async fn read_available(&self) -> io::Result<Vec<u8>> {
        let mut state = self.state.lock();
        if state.closed || state.fail_reads {
            return Err(broken_pipe());
        }
        Ok(state.inbound.pop_front().unwrap_or_default())
    }

    async fn close(&self) {
        self.state.lock().closed = true;
    }
}

/// Opener handing out one shared [`MockChannel`].
#[derive(Clone, Default)]
pub struct MockOpener {
    channel: MockChannel,
    failures_left: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel returned by every successful open.
    pub fn channel(&self) -> MockChannel {
        self.channel.clone()
    }

    /// Fail the next `count` opens.
    pub fn fail_opens(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelOpener for MockOpener {
    async fn open(&self, address: &str) -> io::Result<Arc<dyn SerialChannel>> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such port: {}", address),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.channel.reopen();
        Ok(Arc::new(self.channel.clone()))
    }
}

/// A send observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub command: ActuatorCommand,
    pub at: Instant,
}

#[derive(Default)]
struct TransportState {
    sent: Vec<SentCommand>,
    /// Scripted outcomes of upcoming sends; empty means succeed
    send_script: VecDeque<bool>,
    fail_all_sends: bool,
    /// Time each send takes before it completes
    send_delay: Option<Duration>,
    /// Time each connect takes before it completes
    connect_delay: Option<Duration>,
    /// Scripted outcomes of upcoming connects; empty means succeed
    connect_script: VecDeque<bool>,
    connect_calls: Vec<String>,
}

/// Transport double with scripted outcomes.
#[derive(Clone)]
pub struct MockTransport {
    mode: WireMode,
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    /// A connected text-mode transport.
    pub fn new() -> Self {
        Self::with_mode(WireMode::Text)
    }

    pub fn with_mode(mode: WireMode) -> Self {
        Self {
            mode,
            connected: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(TransportState::default())),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail the next `count` sends.
    pub fn fail_next_sends(&self, count: usize) {
        let mut state = self.state.lock();
        state.send_script.extend(std::iter::repeat(false).take(count));
    }

    /// Fail every send until turned off.
    pub fn fail_all_sends(&self, fail: bool) {
        self.state.lock().fail_all_sends = fail;
    }

    /// Make every send take `delay` before completing.
    pub fn delay_sends(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    /// Make every connect take `delay` before completing.
    pub fn delay_connects(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Script the outcome of upcoming connects, in order.
    pub fn script_connects(&self, outcomes: &[bool]) {
        self.state.lock().connect_script.extend(outcomes.iter().copied());
    }

    /// Commands sent successfully, in order.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.state.lock().sent.clone()
    }

    pub fn sent_commands(&self) -> Vec<ActuatorCommand> {
        self.state.lock().sent.iter().map(|s| s.command.clone()).collect()
    }

    /// Addresses passed to `connect`, in order.
    pub fn connect_calls(&self) -> Vec<String> {
        self.state.lock().connect_calls.clone()
    }

    fn encode(&self, command: &ActuatorCommand) -> TransportResult<Vec<u8>> {
        match self.mode {
            WireMode::Text => LineCodec.encode(command),
            WireMode::Binary => BinaryCodec.encode(command),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn wire_mode(&self) -> WireMode {
        self.mode
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn check_encodable(&self, command: &ActuatorCommand) -> TransportResult<()> {
        self.encode(command).map(|_| ())
    }

    async fn connect(&self, address: &str) -> TransportResult<()> {
        let (succeed, delay) = {
            let mut state = self.state.lock();
            state.connect_calls.push(address.to_string());
            (
                state.connect_script.pop_front().unwrap_or(true),
                state.connect_delay,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.connected.store(succeed, Ordering::SeqCst);
        if succeed {
            Ok(())
        } else {
            Err(TransportError::Open {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted connect failure"),
            })
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, command: &ActuatorCommand) -> TransportResult<()> {
        self.encode(command)?;
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let delay = self.state.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        let succeed = state.send_script.pop_front().unwrap_or(true) && !state.fail_all_sends;
        if !succeed {
            return Err(TransportError::Io(broken_pipe()));
        }
        state.sent.push(SentCommand {
            command: command.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}
