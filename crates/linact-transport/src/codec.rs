//! Wire codecs.
//!
//! A codec turns commands into frame bytes and splits the inbound byte
//! stream into frames. [`LineCodec`] handles the newline-terminated text
//! encoding and [`BinaryCodec`] the fixed two-byte encoding.

use linact_core::{ActuatorCommand, InboundFrame, WireMode};
use tracing::warn;

use crate::error::{TransportError, TransportResult};

/// Longest text line kept while waiting for its terminator.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Left at the front of the buffer after an oversized line was dropped, so
/// the rest of that line is skipped up to its terminator. Never valid UTF-8.
const DISCARD_MARKER: u8 = 0xFF;

/// Size of one binary frame.
pub const BINARY_FRAME_LEN: usize = 2;

/// Encodes outbound commands and decodes inbound frames.
pub trait FrameCodec: Send + Sync + 'static {
    /// Wire mode implemented by this codec.
    fn mode(&self) -> WireMode;

    /// Encode one command into a complete frame.
    fn encode(&self, command: &ActuatorCommand) -> TransportResult<Vec<u8>>;

    /// Remove every complete frame from the front of `buffer`.
    ///
    /// Incomplete trailing bytes stay in the buffer for the next read.
    fn decode(&self, buffer: &mut Vec<u8>) -> Vec<InboundFrame>;
}

/// Newline-terminated UTF-8 text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl FrameCodec for LineCodec {
    fn mode(&self) -> WireMode {
        WireMode::Text
    }

    fn encode(&self, command: &ActuatorCommand) -> TransportResult<Vec<u8>> {
        let text = command.to_string();
        if text.trim().is_empty() || text.contains(['\n', '\r']) {
            return Err(TransportError::Unsupported {
                command: text.escape_default().to_string(),
                mode: WireMode::Text,
            });
        }
        let mut frame = text.into_bytes();
        frame.push(b'\n');
        Ok(frame)
    }

    fn decode(&self, buffer: &mut Vec<u8>) -> Vec<InboundFrame> {
        let mut frames = Vec::new();
        if buffer.first() == Some(&DISCARD_MARKER) {
            match buffer.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    buffer.drain(..=end);
                }
                None => {
                    buffer.truncate(1);
                    return frames;
                }
            }
        }
        while let Some(end) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=end).collect();
            if let Some(text) = decode_line(&line) {
                frames.push(InboundFrame::Text(text));
            }
        }
        if buffer.len() > MAX_LINE_LENGTH {
            warn!(
                bytes = buffer.len(),
                "Discarding unterminated inbound line"
            );
            buffer.clear();
            buffer.push(DISCARD_MARKER);
        }
        frames
    }
}

/// Decode one raw line, dropping malformed UTF-8 and surrounding whitespace.
fn decode_line(raw: &[u8]) -> Option<String> {
    let text: String = String::from_utf8_lossy(raw)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Fixed two-byte frames: opcode, payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl FrameCodec for BinaryCodec {
    fn mode(&self) -> WireMode {
        WireMode::Binary
    }

    fn encode(&self, command: &ActuatorCommand) -> TransportResult<Vec<u8>> {
        let opcode = command.opcode().ok_or_else(|| TransportError::Unsupported {
            command: command.to_string(),
            mode: WireMode::Binary,
        })?;
        let payload = match command {
            ActuatorCommand::SetSpeed(interval) => {
                u8::try_from(*interval).map_err(|_| TransportError::PayloadOutOfRange {
                    command: command.to_string(),
                    value: *interval,
                })?
            }
            _ => 0,
        };
        Ok(vec![opcode, payload])
    }

    fn decode(&self, buffer: &mut Vec<u8>) -> Vec<InboundFrame> {
        let complete = buffer.len() - buffer.len() % BINARY_FRAME_LEN;
        buffer
            .drain(..complete)
            .collect::<Vec<u8>>()
            .chunks_exact(BINARY_FRAME_LEN)
            .map(|pair| InboundFrame::Binary {
                code: pair[0],
                payload: pair[1],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_encode() {
        let codec = LineCodec;
        assert_eq!(codec.encode(&ActuatorCommand::Up).unwrap(), b"UP\n");
        assert_eq!(
            codec.encode(&ActuatorCommand::SetSpeed(800)).unwrap(),
            b"SET_SPEED 800\n"
        );
        assert_eq!(codec.encode(&ActuatorCommand::PumpOn).unwrap(), b"PUMP_ON\n");
    }

    #[test]
    fn test_line_encode_rejects_embedded_newline() {
        let codec = LineCodec;
        let err = codec
            .encode(&ActuatorCommand::Raw("UP\nDOWN".to_string()))
            .unwrap_err();
        assert!(err.is_encoding());
        assert!(codec.encode(&ActuatorCommand::Raw("  ".to_string())).is_err());
    }

    #[test]
    fn test_line_decode_partial_and_crlf() {
        let codec = LineCodec;
        let mut buffer = b"Motor detenido\r\nDistancia act".to_vec();

        let frames = codec.decode(&mut buffer);
        assert_eq!(frames, vec![InboundFrame::Text("Motor detenido".to_string())]);
        assert_eq!(buffer, b"Distancia act");

        buffer.extend_from_slice(b"ual: 12.50 cm\n\n");
        let frames = codec.decode(&mut buffer);
        assert_eq!(
            frames,
            vec![InboundFrame::Text("Distancia actual: 12.50 cm".to_string())]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_line_decode_discards_malformed_bytes() {
        let codec = LineCodec;
        let mut buffer = b"Velocidad actual: 8\xff00 \xce\xbcs\n".to_vec();
        let frames = codec.decode(&mut buffer);
        assert_eq!(
            frames,
            vec![InboundFrame::Text("Velocidad actual: 800 μs".to_string())]
        );
    }

    #[test]
    fn test_line_decode_drops_oversized_line() {
        let codec = LineCodec;
        let mut buffer = vec![b'x'; MAX_LINE_LENGTH + 1];
        assert!(codec.decode(&mut buffer).is_empty());
        assert!(buffer.len() <= 1);

        buffer.extend_from_slice(&[b'x'; 300]);
        assert!(codec.decode(&mut buffer).is_empty());
        assert!(buffer.len() <= 1);

        buffer.extend_from_slice(b"xx\nMotor detenido\n");
        assert_eq!(
            codec.decode(&mut buffer),
            vec![InboundFrame::Text("Motor detenido".to_string())]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_line_decode_skips_tail_of_oversized_line() {
        let codec = LineCodec;
        let mut buffer = vec![b'x'; 1020];
        buffer.extend_from_slice(b"Distancia act");
        assert!(codec.decode(&mut buffer).is_empty());

        buffer.extend_from_slice(b"ual: 12.50 cm\nDistancia actual: 3.00 cm\n");
        assert_eq!(
            codec.decode(&mut buffer),
            vec![InboundFrame::Text("Distancia actual: 3.00 cm".to_string())]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_binary_encode() {
        let codec = BinaryCodec;
        assert_eq!(codec.encode(&ActuatorCommand::Auto).unwrap(), vec![0xA0, 0x00]);
        assert_eq!(codec.encode(&ActuatorCommand::Stop).unwrap(), vec![0xA3, 0x00]);
        assert_eq!(
            codec.encode(&ActuatorCommand::SetSpeed(200)).unwrap(),
            vec![0xA4, 200]
        );
    }

    #[test]
    fn test_binary_encode_errors() {
        let codec = BinaryCodec;
        assert!(matches!(
            codec.encode(&ActuatorCommand::PumpOn),
            Err(TransportError::Unsupported {
                mode: WireMode::Binary,
                ..
            })
        ));
        assert!(matches!(
            codec.encode(&ActuatorCommand::SetSpeed(800)),
            Err(TransportError::PayloadOutOfRange { value: 800, .. })
        ));
    }

    #[test]
    fn test_binary_decode_exact_pairs() {
        let codec = BinaryCodec;
        let mut buffer = vec![0xA1, 0x00, 0xA3];
        assert_eq!(
            codec.decode(&mut buffer),
            vec![InboundFrame::Binary {
                code: 0xA1,
                payload: 0
            }]
        );
        assert_eq!(buffer, vec![0xA3]);

        buffer.push(0x07);
        assert_eq!(
            codec.decode(&mut buffer),
            vec![InboundFrame::Binary {
                code: 0xA3,
                payload: 7
            }]
        );
        assert!(buffer.is_empty());
    }
}
