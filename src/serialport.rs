//! Synchronous transport on top of the `serialport` crate.
//!
//! # Example
//!
//! ```no_run
//! use svbms_lib::device::{BmsDevice, DeviceEvent};
//! use svbms_lib::protocol::{Command, FrameConfig};
//! use svbms_lib::serialport::{PortConfig, SerialTransport};
//!
//! let port = PortConfig::new("/dev/ttyUSB0");
//! let transport = SerialTransport::open(&port).unwrap();
//! let mut bms = BmsDevice::new(transport, Vec::new(), FrameConfig::default());
//! bms.execute(Command::FetchProtocolVersion).unwrap();
//! while bms.events().is_empty() {
//!     bms.poll();
//! }
//! ```

use crate::device::{ByteSource, Transport};
use crate::error::{TransportError, TransportErrorKind};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Timeout of a single blocking read or write on the port
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    pub name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub timeout: Duration,
}

impl PortConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> TransportError {
        let kind = match err.kind() {
            serialport::ErrorKind::NoDevice => TransportErrorKind::DeviceNotFound,
            serialport::ErrorKind::InvalidInput => TransportErrorKind::Open,
            serialport::ErrorKind::Unknown => TransportErrorKind::Unknown,
            serialport::ErrorKind::Io(kind) => {
                return std::io::Error::new(kind, err.description).into();
            }
        };
        TransportError::new(kind, err.description)
    }
}

#[derive(Debug)]
pub struct SerialTransport {
    serial: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(config: &PortConfig) -> Result<Self, TransportError> {
        log::debug!("Opening serial port {config:?}");
        let serial = serialport::new(&config.name, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()?;
        serial.clear(ClearBuffer::All)?;
        Ok(Self { serial })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let written = self.serial.write(bytes)?;
        log::trace!("{written} bytes written to {:?}", self.serial.name());
        Ok(written)
    }
}

impl ByteSource for SerialTransport {
    fn read_chunk(&mut self) -> Result<Vec<u8>, TransportError> {
        let pending = self.serial.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }
        log::trace!("Got {pending} pending bytes");
        let mut buf = vec![0; pending];
        match self.serial.read(buf.as_mut_slice()) {
            Ok(received) => {
                buf.truncate(received);
                Ok(buf)
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}
