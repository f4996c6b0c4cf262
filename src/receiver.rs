use crate::error::ProtocolError;
use crate::protocol::{hex_text, parse_hex_field, payload_checksum, Frame};
use crate::protocol::{EOI, PROTOCOL_VERSION, SOI_3E, SOI_7E};

const MINIMUM_FRAME_SIZE: usize = 3;

/// Collects inbound bytes until they form a frame.
///
/// Every pushed chunk is appended to the buffer and the whole buffer is
/// validated again. A valid frame is handed out and the buffer cleared; a
/// rejected buffer is kept as is, so following chunks are validated together
/// with the bytes received so far. Use [`FrameReceiver::reset`] to drop them.
#[derive(Debug, Clone, Default)]
pub struct FrameReceiver {
    buffer: Vec<u8>,
    verify_checksum: Option<ChecksumMode>,
}

/// CHKSUM layout expected by inbound checksum verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumMode {
    pub ascii_doubled: bool,
}

impl FrameReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Additionally verify the CHKSUM field of inbound frames.
    pub fn with_checksum_verification(mut self, mode: ChecksumMode) -> Self {
        self.verify_checksum = Some(mode);
        self
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            log::debug!("Discarding {} buffered bytes", self.buffer.len());
        }
        self.buffer.clear();
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Frame, ProtocolError> {
        self.buffer.extend_from_slice(chunk);
        log::trace!("RCV> [{}] {:02X?}", self.buffer.len(), self.buffer);

        if let Err(err) = self.validate() {
            log::debug!("Buffer of {} bytes rejected: {err}", self.buffer.len());
            return Err(err);
        }
        Ok(Frame::from(std::mem::take(&mut self.buffer)))
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let buffer = &self.buffer;
        if buffer.len() < MINIMUM_FRAME_SIZE {
            return Err(ProtocolError::Malformed);
        }
        if buffer[0] != SOI_3E && buffer[0] != SOI_7E {
            return Err(ProtocolError::Malformed);
        }
        if !has_protocol_version(buffer) {
            return Err(ProtocolError::InvalidVersion(buffer[1]));
        }
        if buffer[buffer.len() - 1] != EOI {
            return Err(ProtocolError::Malformed);
        }
        if let Some(mode) = self.verify_checksum {
            verify_checksum(buffer, mode)?;
        }
        Ok(())
    }
}

/// VER either as raw byte or as its two hex digits.
fn has_protocol_version(buffer: &[u8]) -> bool {
    buffer[1] == PROTOCOL_VERSION || buffer.get(1..3) == Some(&hex_text(PROTOCOL_VERSION)[..])
}

fn verify_checksum(buffer: &[u8], mode: ChecksumMode) -> Result<(), ProtocolError> {
    let width = if mode.ascii_doubled { 8 } else { 4 };
    let end = buffer.len() - 1;
    let start = end
        .checked_sub(width)
        .filter(|start| *start > 1)
        .ok_or(ProtocolError::Malformed)?;
    let received = parse_hex_field(&buffer[start..end], mode.ascii_doubled)
        .ok_or(ProtocolError::Malformed)? as u16;
    let calculated = payload_checksum(&buffer[1..start])?;
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} buffer={buffer:02X?}"
        );
        return Err(ProtocolError::InvalidChecksum {
            calculated,
            received,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, FrameConfig};

    #[test]
    fn short_buffers_are_malformed() {
        let mut receiver = FrameReceiver::new();
        assert_eq!(receiver.push(&[]), Err(ProtocolError::Malformed));
        assert_eq!(receiver.push(&[SOI_3E]), Err(ProtocolError::Malformed));
        assert_eq!(receiver.push(&[PROTOCOL_VERSION]), Err(ProtocolError::Malformed));
        assert_eq!(receiver.buffered(), &[SOI_3E, PROTOCOL_VERSION]);
    }

    #[test]
    fn minimal_frame_is_delivered() {
        let mut receiver = FrameReceiver::new();
        let frame = receiver.push(&[0x3e, 0x22, 0x0d]).unwrap();
        assert_eq!(frame.as_bytes(), &[0x3e, 0x22, 0x0d]);
        assert!(receiver.buffered().is_empty());

        let frame = receiver.push(&[0x7e, 0x22, 0x0d]).unwrap();
        assert_eq!(frame.as_bytes(), &[0x7e, 0x22, 0x0d]);
    }

    #[test]
    fn rejected_buffer_is_kept() {
        let mut receiver = FrameReceiver::new();
        assert_eq!(
            receiver.push(&[0x3e, 0x99, 0x0d]),
            Err(ProtocolError::InvalidVersion(0x99))
        );
        assert_eq!(receiver.buffered(), &[0x3e, 0x99, 0x0d]);

        assert_eq!(
            receiver.push(&[0x3e, 0x22, 0x0d]),
            Err(ProtocolError::InvalidVersion(0x99))
        );
        assert_eq!(receiver.buffered(), &[0x3e, 0x99, 0x0d, 0x3e, 0x22, 0x0d]);

        receiver.reset();
        assert!(receiver.push(&[0x3e, 0x22, 0x0d]).is_ok());
    }

    #[test]
    fn bad_markers_are_malformed() {
        let mut receiver = FrameReceiver::new();
        assert_eq!(receiver.push(&[0x3f, 0x22, 0x0d]), Err(ProtocolError::Malformed));
        receiver.reset();
        assert_eq!(receiver.push(&[0x3e, 0x22, 0x0a]), Err(ProtocolError::Malformed));
        assert_eq!(receiver.buffered().len(), 3);
    }

    #[test]
    fn partial_frame_completes() {
        let mut receiver = FrameReceiver::new();
        assert_eq!(receiver.push(b"~22014A00"), Err(ProtocolError::Malformed));
        let frame = receiver.push(b"0000FDA6\r").unwrap();
        assert_eq!(frame.as_bytes(), b"~22014A000000FDA6\r");
    }

    #[test]
    fn encoded_frames_round_trip() {
        let configs = [
            FrameConfig::default(),
            FrameConfig {
                length_ascii_doubled: true,
                checksum_ascii_doubled: true,
                ..FrameConfig::default()
            },
        ];
        for config in configs {
            for command in Command::ALL {
                let request = command.request(config).unwrap();

                let mut receiver = FrameReceiver::new();
                let at_once = receiver.push(&request).unwrap();

                let mut receiver = FrameReceiver::new();
                let (last, head) = request.split_last().unwrap();
                for b in head {
                    assert!(receiver.push(&[*b]).is_err());
                }
                let byte_by_byte = receiver.push(&[*last]).unwrap();

                assert_eq!(at_once, byte_by_byte);
                assert_eq!(at_once, request);
            }
        }
    }

    #[test]
    fn checksum_verification() {
        let config = FrameConfig {
            checksum_ascii_doubled: true,
            ..FrameConfig::default()
        };
        let mode = ChecksumMode {
            ascii_doubled: true,
        };
        let request = Command::FetchManufacturer.request(config).unwrap();

        let mut receiver = FrameReceiver::new().with_checksum_verification(mode);
        assert_eq!(receiver.push(&request).unwrap(), request);

        let mut corrupted = request.into_bytes();
        corrupted[3] = b'2';
        assert!(matches!(
            receiver.push(&corrupted),
            Err(ProtocolError::InvalidChecksum { .. })
        ));
        assert_eq!(receiver.buffered(), &corrupted[..]);

        receiver.reset();
        assert_eq!(receiver.push(&[0x3e, 0x22, 0x0d]), Err(ProtocolError::Malformed));
    }
}
