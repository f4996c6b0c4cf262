#![cfg_attr(docsrs, feature(doc_cfg))]
//! # svbms_lib
//!
//! This crate implements the ASCII-hex framing protocol of SuperVolt LiFePO4
//! battery management systems (SX150 family) used over RS232/RS485.
//!
//! A request frame looks like
//! `SOI VER ADR CID1 CID2 LENGTH INFO CHKSUM EOI`, where everything between
//! the SOI and EOI marker bytes is sent as hex text. [`protocol`] builds
//! those frames, [`receiver`] collects inbound bytes into frames and
//! [`device`] ties both to a byte stream.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `svbms` command-line tool and pulls in `serialport` and `serde`.
//!
//! ### Client Features
//! - `serialport`: Enables the **synchronous** transport using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** client using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for configuration and decoded responses.
//! - `bin-dependencies`: Enables all features required by the `svbms` binary executable.

/// Transport independent device handling.
pub mod device;
/// Contains error types for the library.
mod error;
/// Wire constants, checksums and the frame encoder.
pub mod protocol;
/// Inbound frame boundary detection.
pub mod receiver;
/// Response header decoding.
pub mod response;

pub use error::{Error, ProtocolError, ReturnCode, TransportError, TransportErrorKind};

/// Synchronous serial port transport.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous client for BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
