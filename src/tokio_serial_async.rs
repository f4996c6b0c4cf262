//! Provides an asynchronous client for the BMS using Tokio and the
//! `tokio-serial` crate for serial communication.
//!
//! Commands are still fire-and-forget at the protocol level: [`BmsDevice::execute`]
//! only writes the request, [`BmsDevice::next_frame`] waits for the next
//! frame the receiver delivers. [`BmsDevice::request`] combines both.
//! A response that is still incomplete when the timeout elapses is dropped.
//!
//! # Example
//!
//! ```no_run
//! use svbms_lib::protocol::Command;
//! use svbms_lib::tokio_serial_async::BmsDevice;
//! use svbms_lib::Error;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut bms = BmsDevice::new("/dev/ttyUSB0", 19200)?;
//!     bms.set_timeout(Duration::from_millis(500));
//!
//!     let response = bms.request(Command::FetchManufacturer).await?;
//!     println!("Manufacturer: {:?}", String::from_utf8_lossy(&response.info));
//!     Ok(())
//! }
//! ```

use crate::error::{Error, TransportError, TransportErrorKind};
use crate::protocol::{Command, Frame, FrameConfig};
use crate::receiver::FrameReceiver;
use crate::response::ResponseFrame;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

type Result<T> = std::result::Result<T, Error>;

const READ_CHUNK_SIZE: usize = 64;

fn timeout_error(operation: &str, timeout: Duration) -> Error {
    TransportError::new(
        TransportErrorKind::Timeout,
        format!("{operation} did not complete within {timeout:?}"),
    )
    .into()
}

#[derive(Debug)]
pub struct BmsDevice {
    serial: tokio_serial::SerialStream,
    config: FrameConfig,
    receiver: FrameReceiver,
    io_timeout: Duration,
}

impl BmsDevice {
    /// Opens `port` with 8 data bits, one stop bit, no parity and no flow control.
    pub fn new(port: &str, baud_rate: u32) -> Result<Self> {
        let serial = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|err| Error::from(std::io::Error::from(err)))?;
        Ok(Self {
            serial,
            config: FrameConfig::default(),
            receiver: FrameReceiver::new(),
            io_timeout: Duration::from_secs(1),
        })
    }

    /// Sets the timeout for writing a request and for waiting on a frame.
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FrameConfig) {
        self.config = config;
    }

    pub fn set_receiver(&mut self, receiver: FrameReceiver) {
        self.receiver = receiver;
    }

    /// Encodes and writes `command`, returning the number of bytes written.
    pub async fn execute(&mut self, command: Command) -> Result<usize> {
        let frame = command.request(self.config)?;
        log::debug!(
            "SND> [{}:{}] {}",
            self.config.address,
            frame.len(),
            frame.printable()
        );
        let written = tokio::time::timeout(self.io_timeout, self.serial.write(&frame))
            .await
            .map_err(|_| timeout_error("write", self.io_timeout))??;
        if written != frame.len() {
            log::warn!("Short write: {written} of {} bytes written", frame.len());
        }
        Ok(written)
    }

    /// Reads until the receiver delivers a frame. Rejected buffers are kept
    /// and completed by the following reads. When the timeout elapses the
    /// partial response is discarded.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        let frame = read_frame(&mut self.serial, &mut self.receiver, self.io_timeout).await?;
        log::debug!(
            "RESP> [{}:{}] {}",
            self.config.address,
            frame.len(),
            frame.printable()
        );
        Ok(frame)
    }

    /// Sends `command` and decodes the header of the next frame.
    pub async fn request(&mut self, command: Command) -> Result<ResponseFrame> {
        self.execute(command).await?;
        let frame = self.next_frame().await?;
        let response = ResponseFrame::parse(&frame, &self.config)?;
        response.check_return_code()?;
        Ok(response)
    }

    /// Drops buffered inbound bytes.
    pub fn reset(&mut self) {
        self.receiver.reset();
    }
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    receiver: &mut FrameReceiver,
    timeout: Duration,
) -> Result<Frame> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        let received = match tokio::time::timeout_at(deadline, reader.read(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => {
                receiver.reset();
                return Err(timeout_error("read", timeout));
            }
        };
        if received == 0 {
            return Err(TransportError::new(TransportErrorKind::Read, "end of stream").into());
        }
        match receiver.push(&buf[..received]) {
            Ok(frame) => return Ok(frame),
            Err(err) => log::debug!("Incomplete response: {err}"),
        }
    }
}
