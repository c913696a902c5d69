//! Collaborator boundary: serial port, timer and TCP channel
//!
//! The protocol engine is specified against these traits only; the physical
//! drivers behind them are external collaborators. Production
//! implementations live in [`serial`] and [`tcp`]; tests substitute
//! in-memory doubles.
//!
//! All callbacks into the transport FSMs happen from the engine's own poll
//! loop, so every method takes `&mut self` and nothing here is re-entrant.

pub mod serial;
pub mod tcp;

use std::time::{Duration, Instant};

use crate::error::ModbusResult;

/// Byte-level serial port collaborator
///
/// The receiver and transmitter are enabled mutually exclusively by the
/// transport FSMs; a driver never needs to support both directions at once.
pub trait SerialDriver: Send {
    /// Bounded blocking timeout for [`read_byte`](Self::read_byte)
    fn set_timeout(&mut self, timeout: Duration) -> ModbusResult<()>;

    /// Enable/disable receiver and transmitter
    fn enable(&mut self, rx: bool, tx: bool);

    /// Read one byte, waiting at most the configured timeout.
    /// `Ok(None)` means no byte arrived.
    fn read_byte(&mut self) -> ModbusResult<Option<u8>>;

    /// Write one byte
    fn write_byte(&mut self, byte: u8) -> ModbusResult<()>;

    /// Release the port
    fn close(&mut self);
}

/// One-shot timer collaborator
///
/// Armed by the transport FSMs for the t3.5 silence delay, the respond
/// timeout and the broadcast convert delay. Polled, not interrupt driven:
/// [`poll_expired`](Self::poll_expired) reports expiry exactly once per arm.
pub trait TimerDriver: Send {
    fn arm(&mut self, timeout: Duration);

    fn disable(&mut self);

    /// True exactly once after the armed deadline has passed
    fn poll_expired(&mut self) -> bool;
}

/// Monotonic-clock timer, the default [`TimerDriver`]
#[derive(Debug, Default)]
pub struct SoftTimer {
    deadline: Option<Instant>,
}

impl SoftTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimerDriver for SoftTimer {
    fn arm(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    fn disable(&mut self) {
        self.deadline = None;
    }

    fn poll_expired(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Byte-stream TCP collaborator shared by both roles
///
/// The slave implementation listens and serves one connection at a time;
/// the master implementation holds one outbound connection. MBAP framing on
/// top of the stream is the transport FSM's job.
pub trait TcpChannel: Send {
    /// Fill `buf` completely, waiting at most `timeout` for the first byte.
    /// `Ok(false)` means no data arrived (or no peer is connected).
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> ModbusResult<bool>;

    /// Write the whole frame
    fn write_all(&mut self, frame: &[u8]) -> ModbusResult<()>;

    /// Drop the current peer connection but keep the channel usable
    fn reset_peer(&mut self);

    /// Release all sockets
    fn close(&mut self);
}
