//! Serial port collaborator backed by the `serialport` crate

use std::io::{Read, Write};
use std::time::Duration;

use tracing::debug;

use crate::config::{Parity, SerialConfig};
use crate::error::{ModbusError, ModbusResult};

use super::SerialDriver;

/// [`SerialDriver`](super::SerialDriver) over a platform serial port
pub struct SerialPortDriver {
    port: Box<dyn serialport::SerialPort>,
    rx_enabled: bool,
    tx_enabled: bool,
}

impl SerialPortDriver {
    /// Open the configured port. Failures here are fatal init errors; the
    /// engine performs no retry.
    pub fn open(config: &SerialConfig) -> ModbusResult<Self> {
        let data_bits = match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(ModbusError::InvalidConfig(format!(
                    "unsupported data bits {other}"
                )))
            }
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| ModbusError::Port(format!("{}: {e}", config.port)))?;

        debug!(port = %config.port, baud = config.baud_rate, "serial port opened");
        Ok(Self {
            port,
            rx_enabled: false,
            tx_enabled: false,
        })
    }
}

impl SerialDriver for SerialPortDriver {
    fn set_timeout(&mut self, timeout: Duration) -> ModbusResult<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| ModbusError::Port(e.to_string()))
    }

    fn enable(&mut self, rx: bool, tx: bool) {
        self.rx_enabled = rx;
        self.tx_enabled = tx;
        if !rx {
            // Drop stale input so the next frame starts clean
            let _ = self.port.clear(serialport::ClearBuffer::Input);
        }
    }

    fn read_byte(&mut self) -> ModbusResult<Option<u8>> {
        if !self.rx_enabled {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ModbusError::Io(e.to_string())),
        }
    }

    fn write_byte(&mut self, byte: u8) -> ModbusResult<()> {
        if !self.tx_enabled {
            return Err(ModbusError::IllegalState("transmitter not enabled"));
        }
        self.port.write_all(&[byte])?;
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.port.flush();
        self.rx_enabled = false;
        self.tx_enabled = false;
    }
}
