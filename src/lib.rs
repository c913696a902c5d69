//! Modbus protocol engine
//!
//! Event-driven Modbus implementation for both bus roles over three
//! transports:
//!
//! - **Slave** (responder): [`SlaveEngine`] answers requests against an
//!   application-provided [`RegisterBank`].
//! - **Master** (initiator): [`MasterEngine`] polls the bus while [`Master`]
//!   gives application threads a blocking request API with exactly one
//!   request in flight.
//!
//! Transports: RTU (silence-delimited binary, CRC-16), ASCII (`:`/CRLF
//! delimited hex, LRC) and TCP (MBAP framing). Both engines are cooperative:
//! the application owns the loop and calls `poll()`; nothing here spawns
//! threads.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use modbus_engine::{MemoryBank, SlaveConfig, SlaveEngine};
//!
//! # fn main() -> modbus_engine::ModbusResult<()> {
//! let bank = Arc::new(MemoryBank::uniform(1000));
//! let mut slave = SlaveEngine::new(SlaveConfig::default(), bank)?;
//! slave.enable()?;
//! loop {
//!     slave.poll()?;
//! }
//! # }
//! ```

pub mod bank;
pub mod checksum;
pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod pdu;
pub mod port;
pub mod server;
pub mod transport;

pub use bank::{AccessMode, MemoryBank, Region, RegisterBank};
pub use client::{Master, MasterEngine, MasterErrorListener};
pub use config::{EngineMode, MasterConfig, Parity, SerialConfig, SlaveConfig};
pub use error::{ExceptionCode, ModbusError, ModbusResult, RegisterError, RequestError};
pub use pdu::Pdu;
pub use server::SlaveEngine;
