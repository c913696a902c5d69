//! Engine configuration
//!
//! Configuration is validated once at engine init; everything downstream
//! works with typed values. Serial timing is derived here as a typed
//! [`Duration`] instead of threading raw 50 us tick counts through the API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_SLAVE_ADDRESS, MIN_SLAVE_ADDRESS, RTU_FIXED_T35_BAUD, RTU_FIXED_T35_US,
    SERIAL_BITS_PER_CHAR,
};
use crate::error::{ModbusError, ModbusResult};

/// Transport mode of an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    /// Binary serial framing, silence-delimited, CRC-16 checked
    Rtu,
    /// ASCII serial framing, `:`/CRLF delimited, LRC checked
    Ascii,
    /// MBAP framing over a TCP connection
    Tcp,
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_owned(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
        }
    }
}

/// Configuration for a slave (responder) engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub mode: EngineMode,
    /// Own slave address, 1..=247. Ignored for TCP, which addresses the
    /// engine through the connection itself.
    pub address: u8,
    pub serial: SerialConfig,
    /// TCP listen port, used when `mode == Tcp`
    pub tcp_port: u16,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Rtu,
            address: 1,
            serial: SerialConfig::default(),
            tcp_port: 502,
        }
    }
}

impl SlaveConfig {
    /// Validate the configuration, returning it for chaining
    pub fn validate(self) -> ModbusResult<Self> {
        if self.mode != EngineMode::Tcp
            && !(MIN_SLAVE_ADDRESS..=MAX_SLAVE_ADDRESS).contains(&self.address)
        {
            return Err(ModbusError::InvalidConfig(format!(
                "slave address {} outside {}..={}",
                self.address, MIN_SLAVE_ADDRESS, MAX_SLAVE_ADDRESS
            )));
        }
        Ok(self)
    }
}

/// Configuration for a master (initiator) engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub mode: EngineMode,
    pub serial: SerialConfig,
    /// Peer address for TCP, e.g. `10.0.0.5:502`
    pub tcp_peer: String,
    /// How long to wait for a slave response before classifying the request
    /// as a respond timeout
    pub respond_timeout: Duration,
    /// Post-send settle delay after a broadcast, which expects no response
    pub convert_delay: Duration,
    /// Highest slave address configured on the bus. Bounds request
    /// destinations and the broadcast read fan-out.
    pub total_slaves: u8,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Rtu,
            serial: SerialConfig::default(),
            tcp_peer: "127.0.0.1:502".to_owned(),
            respond_timeout: Duration::from_millis(1000),
            convert_delay: Duration::from_millis(200),
            total_slaves: 16,
        }
    }
}

impl MasterConfig {
    pub fn validate(self) -> ModbusResult<Self> {
        if self.total_slaves == 0 || self.total_slaves > MAX_SLAVE_ADDRESS {
            return Err(ModbusError::InvalidConfig(format!(
                "total_slaves {} outside 1..={}",
                self.total_slaves, MAX_SLAVE_ADDRESS
            )));
        }
        if self.respond_timeout.is_zero() {
            return Err(ModbusError::InvalidConfig(
                "respond_timeout must be non-zero".to_owned(),
            ));
        }
        Ok(self)
    }
}

/// Inter-frame silence (t3.5) for the RTU transport at a given baud rate.
///
/// Above 19200 baud the specification fixes the delay at 1750 us. Below,
/// a character is 11 bit times and t3.5 is 3.5 character times.
pub fn rtu_t35(baud_rate: u32) -> Duration {
    if baud_rate > RTU_FIXED_T35_BAUD {
        Duration::from_micros(RTU_FIXED_T35_US)
    } else {
        let char_us = SERIAL_BITS_PER_CHAR * 1_000_000 / baud_rate as u64;
        Duration::from_micros(char_us * 7 / 2)
    }
}
