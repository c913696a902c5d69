//! In-memory collaborator doubles for transport FSM tests

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};
use crate::port::{SerialDriver, TimerDriver};

/// Scripted serial port: tests queue inbound bytes and inspect outbound ones
#[derive(Default)]
pub struct MockSerial {
    pub rx_queue: VecDeque<u8>,
    pub tx_bytes: Vec<u8>,
    pub rx_enabled: bool,
    pub tx_enabled: bool,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx_queue.extend(bytes.iter().copied());
    }
}

impl SerialDriver for MockSerial {
    fn set_timeout(&mut self, _timeout: Duration) -> ModbusResult<()> {
        Ok(())
    }

    fn enable(&mut self, rx: bool, tx: bool) {
        self.rx_enabled = rx;
        self.tx_enabled = tx;
    }

    fn read_byte(&mut self) -> ModbusResult<Option<u8>> {
        if !self.rx_enabled {
            return Ok(None);
        }
        Ok(self.rx_queue.pop_front())
    }

    fn write_byte(&mut self, byte: u8) -> ModbusResult<()> {
        if !self.tx_enabled {
            return Err(ModbusError::IllegalState("transmitter not enabled"));
        }
        self.tx_bytes.push(byte);
        Ok(())
    }

    fn close(&mut self) {
        self.rx_enabled = false;
        self.tx_enabled = false;
    }
}

/// Manually fired timer so tests control expiry deterministically
#[derive(Default)]
pub struct ManualTimer {
    pub armed_with: Option<Duration>,
    fire_pending: bool,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate deadline expiry of the currently armed timer
    pub fn fire(&mut self) {
        if self.armed_with.is_some() {
            self.fire_pending = true;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed_with.is_some()
    }
}

impl TimerDriver for ManualTimer {
    fn arm(&mut self, timeout: Duration) {
        self.armed_with = Some(timeout);
        self.fire_pending = false;
    }

    fn disable(&mut self) {
        self.armed_with = None;
        self.fire_pending = false;
    }

    fn poll_expired(&mut self) -> bool {
        if self.fire_pending {
            self.fire_pending = false;
            self.armed_with = None;
            true
        } else {
            false
        }
    }
}
