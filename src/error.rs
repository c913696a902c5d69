//! Core error types and result handling
//!
//! Three error layers mirror the protocol design:
//!
//! - [`ModbusError`] covers engine-level failures: init, transport, framing
//!   and state violations. Recoverable conditions are always returned as
//!   typed values, never panics.
//! - [`ExceptionCode`] is the one-byte protocol exception a slave sends back
//!   inside an exception response.
//! - [`RegisterError`] is what the application's register access callback
//!   reports; a single mapping ([`ExceptionCode::from_register_error`])
//!   translates it into the wire exception.
//! - [`RequestError`] is the synchronous result code the master request API
//!   hands back to the caller.

use thiserror::Error;

/// Result type alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Engine-level errors
#[derive(Error, Debug)]
pub enum ModbusError {
    /// Serial port or socket layer failed at init time. Fatal, no retry
    /// inside the engine.
    #[error("port error: {0}")]
    Port(String),

    /// Timer collaborator failed at init time
    #[error("timer error: {0}")]
    Timer(String),

    /// Invalid configuration rejected at engine init
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation invoked in a state that does not permit it, e.g. disabling
    /// an engine that is mid-request
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// Framing failure on receive: bad length or checksum
    #[error("frame error: {0}")]
    Frame(&'static str),

    /// Transport-level I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// A buffer supplied at init time is too small to hold the configured
    /// payload (e.g. the Report Slave ID identifier)
    #[error("insufficient resources: {0}")]
    InsufficientResources(&'static str),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

/// Modbus protocol exception codes (slave to master, one byte on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    /// Decode an exception code byte from an exception response
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::SlaveDeviceBusy),
            0x08 => Some(Self::MemoryParityError),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailed),
            _ => None,
        }
    }

    /// Translate a register callback error into the exception the slave
    /// reports on the wire. This is the single error-mapping point for all
    /// function handlers.
    pub fn from_register_error(err: RegisterError) -> Self {
        match err {
            RegisterError::NoSuchRegister => Self::IllegalDataAddress,
            RegisterError::Timeout => Self::SlaveDeviceBusy,
            RegisterError::Io => Self::SlaveDeviceFailure,
        }
    }
}

/// Errors reported by the application's register access callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The requested address range is not backed by any register
    NoSuchRegister,
    /// The backing store did not respond in time
    Timeout,
    /// The backing store failed (sensor fault, bus error, ...)
    Io,
}

/// Result codes returned synchronously by the master request API
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// Another request already holds the single in-flight permit and it was
    /// not released within the caller's timeout
    #[error("master busy")]
    MasterBusy,

    /// The slave did not answer within the respond timeout window
    #[error("respond timeout")]
    RespondTimeout,

    /// A frame arrived but could not be used: framing error or a slave
    /// address that does not match the request destination
    #[error("receive data error")]
    ReceiveData,

    /// The response decoded to an exception or failed response validation
    #[error("execute function error")]
    ExecuteFunction,

    /// Request argument rejected before touching the wire
    #[error("illegal argument")]
    IllegalArgument,

    /// The master engine is not enabled
    #[error("engine not enabled")]
    NotEnabled,
}
