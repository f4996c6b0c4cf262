use std::fmt;

/// Errors raised by the framing protocol, either while building an outbound
/// frame, while validating inbound bytes or reported by the device itself
/// through the return code of a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// LENID does not fit into 12 bits.
    #[error("length {0:#X} exceeds the 12 bit LENID range")]
    LengthOverflow(u16),
    /// Nothing to checksum besides the SOI byte.
    #[error("frame has no payload to checksum")]
    EmptyPayload,
    /// The raw byte sum of the payload is zero.
    #[error("payload sums up to zero")]
    ZeroChecksum,
    /// Too short, wrong SOI or wrong EOI.
    #[error("malformed frame")]
    Malformed,
    #[error("invalid protocol version {0:#04X}")]
    InvalidVersion(u8),
    #[error("invalid checksum - calculated={calculated:04X} received={received:04X}")]
    InvalidChecksum { calculated: u16, received: u16 },
    #[error("invalid length checksum")]
    InvalidLChecksum,
    /// The device answered with a return code other than [`ReturnCode::Normal`].
    #[error("device rejected request: {0}")]
    Device(ReturnCode),
}

impl ProtocolError {
    /// Numeric code of this error as used by the device return codes.
    pub fn code(&self) -> u8 {
        match self {
            ProtocolError::InvalidVersion(_) => 0x01,
            ProtocolError::InvalidChecksum { .. } | ProtocolError::ZeroChecksum => 0x02,
            ProtocolError::InvalidLChecksum => 0x03,
            ProtocolError::Malformed | ProtocolError::LengthOverflow(_) => 0x05,
            ProtocolError::EmptyPayload => 0x06,
            ProtocolError::Device(return_code) => return_code.code(),
        }
    }
}

/// RTN field of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReturnCode {
    Normal,
    VersionError,
    ChecksumError,
    LChecksumError,
    InvalidCid2,
    FormatError,
    InvalidData,
    /// 0x80..=0xFE
    UserDefined(u8),
    Unknown(u8),
}

impl ReturnCode {
    pub fn code(&self) -> u8 {
        match self {
            ReturnCode::Normal => 0x00,
            ReturnCode::VersionError => 0x01,
            ReturnCode::ChecksumError => 0x02,
            ReturnCode::LChecksumError => 0x03,
            ReturnCode::InvalidCid2 => 0x04,
            ReturnCode::FormatError => 0x05,
            ReturnCode::InvalidData => 0x06,
            ReturnCode::UserDefined(code) | ReturnCode::Unknown(code) => *code,
        }
    }
}

impl From<u8> for ReturnCode {
    fn from(code: u8) -> Self {
        match code {
            0x00 => ReturnCode::Normal,
            0x01 => ReturnCode::VersionError,
            0x02 => ReturnCode::ChecksumError,
            0x03 => ReturnCode::LChecksumError,
            0x04 => ReturnCode::InvalidCid2,
            0x05 => ReturnCode::FormatError,
            0x06 => ReturnCode::InvalidData,
            0x80..=0xfe => ReturnCode::UserDefined(code),
            _ => ReturnCode::Unknown(code),
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReturnCode::Normal => write!(f, "normal"),
            ReturnCode::VersionError => write!(f, "version error"),
            ReturnCode::ChecksumError => write!(f, "CHKSUM error"),
            ReturnCode::LChecksumError => write!(f, "LCHKSUM error"),
            ReturnCode::InvalidCid2 => write!(f, "CID2 invalid"),
            ReturnCode::FormatError => write!(f, "command format error"),
            ReturnCode::InvalidData => write!(f, "invalid data"),
            ReturnCode::UserDefined(code) => write!(f, "user defined error {code:#04X}"),
            ReturnCode::Unknown(code) => write!(f, "unknown return code {code:#04X}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportErrorKind {
    DeviceNotFound,
    Permission,
    Open,
    Parity,
    Framing,
    BreakCondition,
    Write,
    Read,
    Resource,
    UnsupportedOperation,
    Unknown,
    Timeout,
    NotOpen,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportErrorKind::DeviceNotFound => write!(f, "Device not found"),
            TransportErrorKind::Permission => write!(f, "Permission denied"),
            TransportErrorKind::Open => write!(f, "Cannot open device"),
            TransportErrorKind::Parity => write!(f, "Parity error"),
            TransportErrorKind::Framing => write!(f, "Framing error"),
            TransportErrorKind::BreakCondition => write!(f, "Break condition"),
            TransportErrorKind::Write => write!(f, "Write error"),
            TransportErrorKind::Read => write!(f, "Read error"),
            TransportErrorKind::Resource => write!(f, "Resource unavailable"),
            TransportErrorKind::UnsupportedOperation => write!(f, "Unsupported operation"),
            TransportErrorKind::Unknown => write!(f, "Unknown error"),
            TransportErrorKind::Timeout => write!(f, "Timeout"),
            TransportErrorKind::NotOpen => write!(f, "Device not open"),
        }
    }
}

/// Error of the underlying byte stream, passed through unchanged apart from
/// being classified by [`TransportErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    kind: TransportErrorKind,
    detail: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> TransportError {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => TransportErrorKind::DeviceNotFound,
            ErrorKind::PermissionDenied => TransportErrorKind::Permission,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            ErrorKind::WriteZero | ErrorKind::BrokenPipe => TransportErrorKind::Write,
            ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            ErrorKind::Unsupported => TransportErrorKind::UnsupportedOperation,
            ErrorKind::NotConnected => TransportErrorKind::NotOpen,
            ErrorKind::OutOfMemory => TransportErrorKind::Resource,
            _ => TransportErrorKind::Unknown,
        };
        TransportError::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Transport(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes_match_device_return_codes() {
        assert_eq!(ProtocolError::InvalidVersion(0x99).code(), 0x01);
        assert_eq!(ProtocolError::ZeroChecksum.code(), 0x02);
        assert_eq!(ProtocolError::InvalidLChecksum.code(), 0x03);
        assert_eq!(ProtocolError::Malformed.code(), 0x05);
        assert_eq!(ProtocolError::LengthOverflow(0x1000).code(), 0x05);
        assert_eq!(ProtocolError::EmptyPayload.code(), 0x06);
        assert_eq!(
            ProtocolError::Device(ReturnCode::InvalidCid2).code(),
            0x04
        );
        assert_eq!(ProtocolError::Device(ReturnCode::from(0x90)).code(), 0x90);
    }

    #[test]
    fn return_codes() {
        for code in 0..=u8::MAX {
            assert_eq!(ReturnCode::from(code).code(), code);
        }
        assert_eq!(ReturnCode::from(0x06), ReturnCode::InvalidData);
        assert_eq!(ReturnCode::from(0x80), ReturnCode::UserDefined(0x80));
        assert_eq!(ReturnCode::from(0x07), ReturnCode::Unknown(0x07));
        assert_eq!(ReturnCode::from(0xff), ReturnCode::Unknown(0xff));
    }

    #[test]
    fn io_errors_are_classified() {
        let err: TransportError =
            std::io::Error::new(std::io::ErrorKind::TimedOut, "no answer").into();
        assert_eq!(err.kind(), TransportErrorKind::Timeout);
        assert_eq!(err.detail(), "no answer");

        let err: Error = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(
            err,
            Error::Transport(ref t) if t.kind() == TransportErrorKind::Permission
        ));
    }
}
