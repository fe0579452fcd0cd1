//! Byte channels underneath the link.
//!
//! [`SerialChannel`] is an opened byte pipe; [`ChannelOpener`] produces one
//! for an address. The production pair wraps the `serialport` crate and
//! runs every blocking call on the blocking thread pool.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linact_core::TransportConfig;
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info};

/// Largest chunk pulled from the port in one read.
const READ_CHUNK: usize = 512;

/// An open byte channel.
#[async_trait]
pub trait SerialChannel: Send + Sync {
    /// Write a complete frame and flush it.
    async fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever is buffered right now. Empty when nothing arrived.
    async fn read_available(&self) -> io::Result<Vec<u8>>;

    /// Release the underlying device. Further I/O fails with `NotConnected`.
    async fn close(&self);
}

/// Opens channels by address.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(&self, address: &str) -> io::Result<Arc<dyn SerialChannel>>;
}

/// Opens real serial ports.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialPortOpener {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.baud_rate, config.io_timeout())
    }
}

#[async_trait]
impl ChannelOpener for SerialPortOpener {
    async fn open(&self, address: &str) -> io::Result<Arc<dyn SerialChannel>> {
        let name = address.to_string();
        let baud_rate = self.baud_rate;
        let timeout = self.timeout;
        debug!(port = %name, baud_rate, "Opening serial port");

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&name, baud_rate)
                .timeout(timeout)
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None)
                .open()
        })
        .await
        .map_err(io::Error::other)??;

        Ok(Arc::new(SerialPortChannel::new(port)))
    }
}

/// A `serialport` handle shared by the reader and the writer.
pub struct SerialPortChannel {
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
}

impl SerialPortChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port: Arc::new(Mutex::new(Some(port))),
        }
    }

    async fn with_port<T, F>(&self, op: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>) -> io::Result<T> + Send + 'static,
    {
        let port = self.port.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock();
            let port = guard
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;
            op(port)
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[async_trait]
impl SerialChannel for SerialPortChannel {
    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let frame = bytes.to_vec();
        self.with_port(move |port| {
            port.write_all(&frame)?;
            port.flush()
        })
        .await
    }

    async fn read_available(&self) -> io::Result<Vec<u8>> {
        self.with_port(|port| {
            let pending = port.bytes_to_read()? as usize;
            if pending == 0 {
                return Ok(Vec::new());
            }
            let mut chunk = vec![0u8; pending.min(READ_CHUNK)];
            let read = port.read(&mut chunk)?;
            chunk.truncate(read);
            Ok(chunk)
        })
        .await
    }

    async fn close(&self) {
        if self.port.lock().take().is_some() {
            debug!("Serial port closed");
        }
    }
}

/// A port seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub description: Option<String>,
}

impl PortCandidate {
    fn looks_like_controller(&self) -> bool {
        let described = self
            .description
            .as_deref()
            .is_some_and(|d| d.contains("Arduino"));
        described || self.name.contains("ttyACM") || self.name.contains("ttyUSB")
    }
}

/// List the serial ports present on this machine.
pub fn available_ports() -> io::Result<Vec<PortCandidate>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let description = match info.port_type {
                SerialPortType::UsbPort(usb) => match (usb.manufacturer, usb.product) {
                    (Some(m), Some(p)) => Some(format!("{} {}", m, p)),
                    (m, p) => m.or(p),
                },
                _ => None,
            };
            PortCandidate {
                name: info.port_name,
                description,
            }
        })
        .collect())
}

/// First candidate that looks like the actuator controller.
pub fn pick_controller_port(candidates: &[PortCandidate]) -> Option<&PortCandidate> {
    candidates.iter().find(|c| c.looks_like_controller())
}

/// Resolve the configured port name.
///
/// `"auto"` scans for a controller and falls back to the platform default
/// when none is found or the scan fails.
pub fn resolve_port(configured: &str) -> String {
    if !configured.eq_ignore_ascii_case("auto") {
        return configured.to_string();
    }
    let fallback = linact_core::config::defaults::PORT;
    match available_ports() {
        Ok(candidates) => match pick_controller_port(&candidates) {
            Some(found) => {
                info!(port = %found.name, "Detected controller port");
                found.name.clone()
            }
            None => {
                info!(port = fallback, "No controller port detected, using default");
                fallback.to_string()
            }
        },
        Err(e) => {
            info!(port = fallback, error = %e, "Port scan failed, using default");
            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, description: Option<&str>) -> PortCandidate {
        PortCandidate {
            name: name.to_string(),
            description: description.map(str::to_string),
        }
    }

    #[test]
    fn test_pick_controller_by_description() {
        let ports = vec![
            candidate("COM1", None),
            candidate("COM4", Some("Arduino LLC Arduino Uno")),
        ];
        assert_eq!(pick_controller_port(&ports).unwrap().name, "COM4");
    }

    #[test]
    fn test_pick_controller_by_device_name() {
        let ports = vec![
            candidate("/dev/ttyS0", None),
            candidate("/dev/ttyACM0", None),
            candidate("/dev/ttyUSB0", None),
        ];
        assert_eq!(pick_controller_port(&ports).unwrap().name, "/dev/ttyACM0");
    }

    #[test]
    fn test_no_controller() {
        let ports = vec![candidate("/dev/ttyS0", Some("16550A"))];
        assert!(pick_controller_port(&ports).is_none());
    }

    #[test]
    fn test_explicit_port_is_kept() {
        assert_eq!(resolve_port("/dev/ttyUSB3"), "/dev/ttyUSB3");
    }
}
