//! Transport independent device handling.
//!
//! [`BmsDevice`] encodes commands and writes them to a [`Transport`]. Inbound
//! bytes are fed in by the owner of the transport, either directly through
//! [`BmsDevice::handle_incoming`] or by [`BmsDevice::poll`] when the transport
//! is also a [`ByteSource`]. Delivered frames and inbound errors are emitted
//! as [`DeviceEvent`]s into an [`EventSink`].

use crate::error::{Error, TransportError};
use crate::protocol::{Command, Frame, FrameConfig};
use crate::receiver::FrameReceiver;
use std::sync::mpsc::Sender;

/// Outbound side of the byte stream.
pub trait Transport {
    /// Writes `bytes`, returning the number of bytes actually written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;
}

/// Inbound side of the byte stream.
pub trait ByteSource {
    /// Returns the bytes available right now, an empty chunk if there are none.
    fn read_chunk(&mut self) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Frame {
        /// Command outstanding when the frame was delivered.
        request: Option<Command>,
        frame: Frame,
    },
    Error(Error),
}

pub trait EventSink {
    fn emit(&mut self, event: DeviceEvent);
}

impl EventSink for Sender<DeviceEvent> {
    fn emit(&mut self, event: DeviceEvent) {
        if self.send(event).is_err() {
            log::trace!("Event receiver gone, dropping event");
        }
    }
}

impl EventSink for Vec<DeviceEvent> {
    fn emit(&mut self, event: DeviceEvent) {
        self.push(event);
    }
}

#[derive(Debug)]
pub struct BmsDevice<T, S> {
    transport: T,
    events: S,
    config: FrameConfig,
    receiver: FrameReceiver,
    outstanding: Option<Command>,
}

impl<T: Transport, S: EventSink> BmsDevice<T, S> {
    pub fn new(transport: T, events: S, config: FrameConfig) -> Self {
        Self {
            transport,
            events,
            config,
            receiver: FrameReceiver::new(),
            outstanding: None,
        }
    }

    pub fn with_receiver(mut self, receiver: FrameReceiver) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FrameConfig) {
        self.config = config;
    }

    pub fn set_address(&mut self, address: u8) {
        self.config.address = address;
    }

    pub fn receiver(&self) -> &FrameReceiver {
        &self.receiver
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn events(&self) -> &S {
        &self.events
    }

    pub fn into_parts(self) -> (T, S) {
        (self.transport, self.events)
    }

    /// Encodes `command` and writes it to the transport.
    ///
    /// Returns the number of bytes written. A short write is logged but not
    /// reported as an error. Nothing is written if encoding fails.
    pub fn execute(&mut self, command: Command) -> Result<usize, Error> {
        let frame = command.request(self.config)?;
        log::debug!(
            "SND> [{}:{}] {}",
            self.config.address,
            frame.len(),
            frame.printable()
        );
        log::trace!("write bytes: {frame:?}");

        if let Some(previous) = self.outstanding {
            log::debug!("No response to {previous} received, sending {command}");
        }
        let written = self.transport.write(&frame)?;
        if written != frame.len() {
            log::warn!("Short write: {written} of {} bytes written", frame.len());
        }
        self.outstanding = Some(command);
        Ok(written)
    }

    /// Feeds inbound bytes to the receiver and emits the outcome.
    pub fn handle_incoming(&mut self, chunk: &[u8]) {
        match self.receiver.push(chunk) {
            Ok(frame) => {
                log::debug!(
                    "RESP> [{}:{}] {}",
                    self.config.address,
                    frame.len(),
                    frame.printable()
                );
                let request = self.outstanding.take();
                self.events.emit(DeviceEvent::Frame { request, frame });
            }
            Err(err) => self.events.emit(DeviceEvent::Error(err.into())),
        }
    }

    pub fn handle_transport_error(&mut self, err: TransportError) {
        log::warn!("Transport error: {err}");
        self.events.emit(DeviceEvent::Error(err.into()));
    }

    /// Drops buffered inbound bytes and forgets the outstanding command.
    pub fn reset(&mut self) {
        self.receiver.reset();
        self.outstanding = None;
    }
}

impl<T: Transport + ByteSource, S: EventSink> BmsDevice<T, S> {
    /// Reads whatever the transport has available and handles it.
    /// Returns the number of bytes read.
    pub fn poll(&mut self) -> usize {
        match self.transport.read_chunk() {
            Ok(chunk) if chunk.is_empty() => 0,
            Ok(chunk) => {
                self.handle_incoming(&chunk);
                chunk.len()
            }
            Err(err) => {
                self.handle_transport_error(err);
                0
            }
        }
    }
}
