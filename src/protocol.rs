use crate::error::ProtocolError;
use std::fmt;
use std::ops::Deref;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const SOI_3E: u8 = 0x3e;
pub const SOI_7E: u8 = 0x7e;
pub const EOI: u8 = 0x0d;

pub const PROTOCOL_VERSION: u8 = 0x22;

/// CID1 of the SX150 LiFePO4 battery management system
pub const CID1_LIFEPO4: u8 = 0x4a;

pub const CID2_FETCH_ANALOG_DATA: u8 = 0x41;
pub const CID2_FETCH_ANALOG_DATA_FIXED: u8 = 0x42;
pub const CID2_FETCH_TIME: u8 = 0x4d;
pub const CID2_FETCH_PROTOCOL_VERSION: u8 = 0x4f;
pub const CID2_FETCH_DEVICE_ADDRESS: u8 = 0x50;
pub const CID2_FETCH_MANUFACTURER: u8 = 0x51;

/// LENID is a 12 bit value, the upper nibble of LENGTH carries LCHKSUM
pub const MAX_LENID: u16 = 0x0fff;

/// LENID sent along with the single supported INFO item
const INFO_LENID: u16 = 2;
const INFO_ANALOG_DATA: u16 = 0x00ff;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StartMarker {
    #[default]
    Soi3E,
    Soi7E,
}

impl StartMarker {
    pub fn byte(self) -> u8 {
        match self {
            StartMarker::Soi3E => SOI_3E,
            StartMarker::Soi7E => SOI_7E,
        }
    }
}

/// Shape of the frames sent to the BMS.
///
/// The two `*_ascii_doubled` flags select whether every hex digit of the
/// LENGTH/INFO resp. CHKSUM field is sent as is, or expanded once more into the
/// two hex digits of its own ASCII code (`'D'` becomes `"44"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameConfig {
    pub start: StartMarker,
    pub address: u8,
    pub length_ascii_doubled: bool,
    pub checksum_ascii_doubled: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            start: StartMarker::Soi3E,
            address: 1,
            length_ascii_doubled: false,
            checksum_ascii_doubled: false,
        }
    }
}

fn hex_digit(nibble: u8) -> u8 {
    HEX_DIGITS[(nibble & 0x0f) as usize]
}

/// Two hex digits of `value`, high nibble first.
pub(crate) fn hex_text(value: u8) -> [u8; 2] {
    [hex_digit(value >> 4), hex_digit(value)]
}

fn push_nibble(buffer: &mut Vec<u8>, nibble: u8, doubled: bool) {
    let digit = hex_digit(nibble);
    if doubled {
        buffer.extend_from_slice(&hex_text(digit));
    } else {
        buffer.push(digit);
    }
}

fn push_byte(buffer: &mut Vec<u8>, value: u8, doubled: bool) {
    push_nibble(buffer, value >> 4, doubled);
    push_nibble(buffer, value, doubled);
}

fn push_word(buffer: &mut Vec<u8>, value: u16, doubled: bool) {
    let [high, low] = value.to_be_bytes();
    push_byte(buffer, high, doubled);
    push_byte(buffer, low, doubled);
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        _ => None,
    }
}

/// Parses a hex text field back into its value, undoing the ASCII doubling
/// when `doubled` is set. Fields wider than 32 bits are rejected.
pub(crate) fn parse_hex_field(text: &[u8], doubled: bool) -> Option<u32> {
    let digits: Vec<u8> = if doubled {
        if text.len() % 2 != 0 {
            return None;
        }
        text.chunks(2)
            .map(|pair| Some(hex_value(pair[0])? << 4 | hex_value(pair[1])?))
            .collect::<Option<_>>()?
    } else {
        text.to_vec()
    };
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    digits
        .iter()
        .try_fold(0u32, |acc, digit| Some(acc << 4 | u32::from(hex_value(*digit)?)))
}

/// LCHKSUM of a LENID: sum of its three nibbles modulo 16, negated.
///
/// `length` must not exceed [`MAX_LENID`].
pub fn length_checksum(length: u16) -> u8 {
    debug_assert!(length <= MAX_LENID);
    let sum = ((length >> 8) & 0x0f) + ((length >> 4) & 0x0f) + (length & 0x0f);
    ((!(sum % 16)).wrapping_add(1) & 0x0f) as u8
}

/// CHKSUM of `bytes`: sum of all byte values modulo 65536, negated.
///
/// A zero sum is rejected, it only results from an empty or degenerated payload.
pub fn payload_checksum(bytes: &[u8]) -> Result<u16, ProtocolError> {
    let sum = bytes.iter().fold(0u64, |acc, b| acc + u64::from(*b));
    if sum == 0 {
        return Err(ProtocolError::ZeroChecksum);
    }
    Ok((!((sum % 65536) as u16)).wrapping_add(1))
}

/// Complete frame as sent to or received from the BMS.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Renders the frame as text, showing line endings as `\r`/`\n` and any
    /// other non printable byte as `<xx>`.
    pub fn printable(&self) -> String {
        let mut result = String::with_capacity(self.0.len());
        for b in &self.0 {
            match *b {
                0x0a => result.push_str("\\n"),
                0x0d => result.push_str("\\r"),
                0x20..=0x7e => result.push(char::from(*b)),
                other => result.push_str(&format!("<{other:02x}>")),
            }
        }
        result
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.0)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.printable())
    }
}

/// Assembles an outbound frame field by field.
///
/// The fields have to be appended in wire order:
/// start, header, length, info (optional), checksum, end.
/// A failing step leaves the already assembled bytes untouched.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    config: FrameConfig,
    buffer: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: Vec::with_capacity(32),
        }
    }

    pub fn append_start(&mut self) -> &mut Self {
        self.buffer.push(self.config.start.byte());
        self
    }

    /// VER, ADR, CID1 and CID2, always two hex digits each.
    pub fn append_header(&mut self, cid2: u8) -> &mut Self {
        for value in [PROTOCOL_VERSION, self.config.address, CID1_LIFEPO4, cid2] {
            self.buffer.extend_from_slice(&hex_text(value));
        }
        self
    }

    /// LCHKSUM followed by the three LENID nibbles. LENID 0 (no INFO item)
    /// is always sent as `0000`.
    pub fn append_length(&mut self, length: u16) -> Result<&mut Self, ProtocolError> {
        if length > MAX_LENID {
            log::warn!("LENID {length:#X} exceeds {MAX_LENID:#X}");
            return Err(ProtocolError::LengthOverflow(length));
        }
        if length == 0 {
            self.buffer.extend_from_slice(b"0000");
            return Ok(self);
        }
        let doubled = self.config.length_ascii_doubled;
        push_nibble(&mut self.buffer, length_checksum(length), doubled);
        push_nibble(&mut self.buffer, (length >> 8) as u8, doubled);
        push_nibble(&mut self.buffer, (length >> 4) as u8, doubled);
        push_nibble(&mut self.buffer, length as u8, doubled);
        Ok(self)
    }

    /// INFO follows the doubling mode of its LENGTH field.
    pub fn append_info(&mut self, info: u16) -> &mut Self {
        push_word(&mut self.buffer, info, self.config.length_ascii_doubled);
        self
    }

    /// CHKSUM over everything after the SOI byte.
    pub fn append_checksum(&mut self) -> Result<&mut Self, ProtocolError> {
        let payload = self.buffer.get(1..).unwrap_or_default();
        if payload.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        let checksum = payload_checksum(payload)?;
        push_word(
            &mut self.buffer,
            checksum,
            self.config.checksum_ascii_doubled,
        );
        Ok(self)
    }

    pub fn append_end(&mut self) -> &mut Self {
        self.buffer.push(EOI);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn finish(self) -> Frame {
        Frame(self.buffer)
    }
}

/// Builds a complete request frame for function code `cid2` with an
/// optional 16 bit INFO item.
pub fn encode(cid2: u8, info: Option<u16>, config: FrameConfig) -> Result<Frame, ProtocolError> {
    let mut encoder = FrameEncoder::new(config);
    encoder.append_start().append_header(cid2);
    match info {
        None => {
            encoder.append_length(0)?;
        }
        Some(info) => {
            encoder.append_length(INFO_LENID)?.append_info(info);
        }
    }
    encoder.append_checksum()?.append_end();
    Ok(encoder.finish())
}

/// Queries supported by the BMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Command {
    FetchTime,
    FetchProtocolVersion,
    FetchDeviceAddress,
    FetchManufacturer,
    /// `fixed` selects the fixed point data set.
    FetchAnalogData { fixed: bool },
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::FetchTime,
        Command::FetchProtocolVersion,
        Command::FetchDeviceAddress,
        Command::FetchManufacturer,
        Command::FetchAnalogData { fixed: false },
        Command::FetchAnalogData { fixed: true },
    ];

    pub fn cid2(&self) -> u8 {
        match self {
            Command::FetchTime => CID2_FETCH_TIME,
            Command::FetchProtocolVersion => CID2_FETCH_PROTOCOL_VERSION,
            Command::FetchDeviceAddress => CID2_FETCH_DEVICE_ADDRESS,
            Command::FetchManufacturer => CID2_FETCH_MANUFACTURER,
            Command::FetchAnalogData { fixed: false } => CID2_FETCH_ANALOG_DATA,
            Command::FetchAnalogData { fixed: true } => CID2_FETCH_ANALOG_DATA_FIXED,
        }
    }

    pub fn info(&self) -> Option<u16> {
        match self {
            Command::FetchAnalogData { .. } => Some(INFO_ANALOG_DATA),
            _ => None,
        }
    }

    pub fn request(&self, config: FrameConfig) -> Result<Frame, ProtocolError> {
        encode(self.cid2(), self.info(), config)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::FetchTime => write!(f, "time"),
            Command::FetchProtocolVersion => write!(f, "protocol version"),
            Command::FetchDeviceAddress => write!(f, "device address"),
            Command::FetchManufacturer => write!(f, "manufacturer"),
            Command::FetchAnalogData { fixed: false } => write!(f, "analog data"),
            Command::FetchAnalogData { fixed: true } => write!(f, "analog data (fixed)"),
        }
    }
}
