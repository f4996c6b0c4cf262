//! Decoding of response frames.
//!
//! The framing layer stops at delivering raw frames. [`ResponseFrame`] splits
//! a delivered frame into its header fields, while the meaning of the INFO
//! payload is left to parsers registered per command in [`PayloadParsers`].

use crate::error::{ProtocolError, ReturnCode};
use crate::protocol::{length_checksum, parse_hex_field, Command, FrameConfig};
use crate::protocol::{EOI, SOI_3E, SOI_7E};
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// SOI + VER + ADR + CID1 + RTN
const HEADER_SIZE: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResponseFrame {
    pub version: u8,
    pub address: u8,
    pub cid1: u8,
    pub return_code: ReturnCode,
    pub lenid: u16,
    /// INFO item decoded from its hex text
    pub info: Vec<u8>,
    pub checksum: u16,
}

fn hex_byte(text: &[u8]) -> Result<u8, ProtocolError> {
    parse_hex_field(text, false)
        .map(|value| value as u8)
        .ok_or(ProtocolError::Malformed)
}

impl ResponseFrame {
    /// Splits `frame` into its fields. LENGTH, INFO and CHKSUM are expected
    /// in the ASCII modes of `config`, a LENGTH of `0000` is accepted in
    /// either mode.
    pub fn parse(frame: &[u8], config: &FrameConfig) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_SIZE + 4 + 4 + 1
            || (frame[0] != SOI_3E && frame[0] != SOI_7E)
            || frame[frame.len() - 1] != EOI
        {
            return Err(ProtocolError::Malformed);
        }

        let version = hex_byte(&frame[1..3])?;
        let address = hex_byte(&frame[3..5])?;
        let cid1 = hex_byte(&frame[5..7])?;
        let return_code = ReturnCode::from(hex_byte(&frame[7..9])?);

        let (length, length_width) = if &frame[HEADER_SIZE..HEADER_SIZE + 4] == b"0000" {
            (0, 4)
        } else {
            let width = if config.length_ascii_doubled { 8 } else { 4 };
            let field = frame
                .get(HEADER_SIZE..HEADER_SIZE + width)
                .ok_or(ProtocolError::Malformed)?;
            let length = parse_hex_field(field, config.length_ascii_doubled)
                .ok_or(ProtocolError::Malformed)?;
            (length as u16, width)
        };
        let lenid = length & 0x0fff;
        if length_checksum(lenid) != (length >> 12) as u8 {
            log::warn!("Invalid LCHKSUM in LENGTH field {length:04X}");
            return Err(ProtocolError::InvalidLChecksum);
        }

        let checksum_width = if config.checksum_ascii_doubled { 8 } else { 4 };
        let info_start = HEADER_SIZE + length_width;
        let info_end = (frame.len() - 1)
            .checked_sub(checksum_width)
            .filter(|end| *end >= info_start)
            .ok_or(ProtocolError::Malformed)?;
        let checksum = parse_hex_field(
            &frame[info_end..frame.len() - 1],
            config.checksum_ascii_doubled,
        )
        .ok_or(ProtocolError::Malformed)? as u16;

        let digits_per_byte = if config.length_ascii_doubled { 4 } else { 2 };
        let info_text = &frame[info_start..info_end];
        let lenid_chars = if config.length_ascii_doubled {
            2 * lenid as usize
        } else {
            lenid as usize
        };
        if info_text.len() != lenid_chars {
            log::warn!(
                "LENID {lenid} does not match {} INFO characters",
                info_text.len()
            );
            return Err(ProtocolError::Malformed);
        }
        if info_text.len() % digits_per_byte != 0 {
            return Err(ProtocolError::Malformed);
        }
        let info = info_text
            .chunks(digits_per_byte)
            .map(|digits| {
                parse_hex_field(digits, config.length_ascii_doubled).map(|value| value as u8)
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or(ProtocolError::Malformed)?;

        Ok(Self {
            version,
            address,
            cid1,
            return_code,
            lenid,
            info,
            checksum,
        })
    }

    /// Maps a return code other than [`ReturnCode::Normal`] to an error.
    pub fn check_return_code(&self) -> Result<(), ProtocolError> {
        match self.return_code {
            ReturnCode::Normal => Ok(()),
            other => Err(ProtocolError::Device(other)),
        }
    }
}

pub type PayloadParser<T> = fn(&ResponseFrame) -> Result<T, ProtocolError>;

/// Payload parsers looked up by the CID2 of the command a response answers.
#[derive(Debug, Clone)]
pub struct PayloadParsers<T> {
    parsers: HashMap<u8, PayloadParser<T>>,
}

impl<T> Default for PayloadParsers<T> {
    fn default() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }
}

impl<T> PayloadParsers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `parser` for responses to `command`, returning the parser
    /// it replaces.
    pub fn register(
        &mut self,
        command: Command,
        parser: PayloadParser<T>,
    ) -> Option<PayloadParser<T>> {
        self.parsers.insert(command.cid2(), parser)
    }

    /// `None` when no parser is registered for `command`.
    pub fn parse(
        &self,
        command: Command,
        response: &ResponseFrame,
    ) -> Option<Result<T, ProtocolError>> {
        let parser = self.parsers.get(&command.cid2())?;
        Some(response.check_return_code().and_then(|_| parser(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manufacturer(response: &ResponseFrame) -> Result<String, ProtocolError> {
        String::from_utf8(response.info.clone())
            .map_err(|_| ProtocolError::Device(ReturnCode::InvalidData))
    }

    #[test]
    fn parse_response_without_info() {
        let frame = b"~22014A000000FDA6\r";
        let response = ResponseFrame::parse(frame, &FrameConfig::default()).unwrap();
        assert_eq!(response.version, 0x22);
        assert_eq!(response.address, 0x01);
        assert_eq!(response.cid1, 0x4a);
        assert_eq!(response.return_code, ReturnCode::Normal);
        assert_eq!(response.lenid, 0);
        assert!(response.info.is_empty());
        assert_eq!(response.checksum, 0xfda6);
        assert_eq!(response.check_return_code(), Ok(()));
    }

    #[test]
    fn parse_response_with_info() {
        // LENID 4, LCHKSUM C
        let frame = b"~22014A00C0045356FD12\r";
        let response = ResponseFrame::parse(frame, &FrameConfig::default()).unwrap();
        assert_eq!(response.lenid, 4);
        assert_eq!(response.info, b"SV");
        assert_eq!(response.checksum, 0xfd12);
    }

    #[test]
    fn parse_response_with_doubled_fields() {
        let config = FrameConfig {
            length_ascii_doubled: true,
            checksum_ascii_doubled: true,
            ..FrameConfig::default()
        };
        // LENGTH "C004", INFO "5356", CHKSUM "FD12", all doubled
        let frame = b"~22014A00433030343533353646443132\r";
        let response = ResponseFrame::parse(frame, &config).unwrap();
        assert_eq!(response.lenid, 4);
        assert_eq!(response.info, b"SV");
        assert_eq!(response.checksum, 0xfd12);

        let truncated = b"~22014A004330303435333546443132\r";
        assert_eq!(
            ResponseFrame::parse(truncated, &config),
            Err(ProtocolError::Malformed)
        );
    }

    #[test]
    fn invalid_length_checksum() {
        let frame = b"~22014A00D0045356FD12\r";
        assert_eq!(
            ResponseFrame::parse(frame, &FrameConfig::default()),
            Err(ProtocolError::InvalidLChecksum)
        );
    }

    #[test]
    fn lenid_must_match_info() {
        let config = FrameConfig::default();
        // LENID 18, LCHKSUM D, but only four INFO characters
        assert_eq!(
            ResponseFrame::parse(b"~22014A00D0125356FD12\r", &config),
            Err(ProtocolError::Malformed)
        );
        // LENID 2 with four INFO characters
        assert_eq!(
            ResponseFrame::parse(b"~22014A00E0025356FD12\r", &config),
            Err(ProtocolError::Malformed)
        );
        // LENID 0 with INFO present
        assert_eq!(
            ResponseFrame::parse(b"~22014A0000005356FD12\r", &config),
            Err(ProtocolError::Malformed)
        );

        let doubled = FrameConfig {
            length_ascii_doubled: true,
            ..config
        };
        // doubled LENGTH "D012" in front of the doubled INFO "5356"
        assert_eq!(
            ResponseFrame::parse(b"~22014A004430313235333536FD12\r", &doubled),
            Err(ProtocolError::Malformed)
        );
    }

    #[test]
    fn malformed_responses() {
        let config = FrameConfig::default();
        assert_eq!(ResponseFrame::parse(b"~22\r", &config), Err(ProtocolError::Malformed));
        assert_eq!(
            ResponseFrame::parse(b"~22014A000000FDA6\n", &config),
            Err(ProtocolError::Malformed)
        );
        assert_eq!(
            ResponseFrame::parse(b"~2X014A000000FDA6\r", &config),
            Err(ProtocolError::Malformed)
        );
    }

    #[test]
    fn device_return_code() {
        let frame = b"~22014A040000FDA2\r";
        let response = ResponseFrame::parse(frame, &FrameConfig::default()).unwrap();
        assert_eq!(
            response.check_return_code(),
            Err(ProtocolError::Device(ReturnCode::InvalidCid2))
        );
    }

    #[test]
    fn registered_payload_parser() {
        let mut parsers = PayloadParsers::new();
        assert!(parsers.register(Command::FetchManufacturer, manufacturer).is_none());

        let response =
            ResponseFrame::parse(b"~22014A00C0045356FD12\r", &FrameConfig::default()).unwrap();
        assert_eq!(
            parsers.parse(Command::FetchManufacturer, &response),
            Some(Ok(String::from("SV")))
        );
        assert_eq!(parsers.parse(Command::FetchTime, &response), None);

        let failed = ResponseFrame {
            return_code: ReturnCode::InvalidData,
            ..response
        };
        assert_eq!(
            parsers.parse(Command::FetchManufacturer, &failed),
            Some(Err(ProtocolError::Device(ReturnCode::InvalidData)))
        );
    }
}
