//! Frame transport state machines
//!
//! A transport owns the byte buffers for one role and converts raw byte and
//! timer events into complete validated frames (address + PDU), or framing
//! errors. One instance serves exactly one engine; all mutation happens from
//! that engine's poll loop.
//!
//! Per role and direction at most one ADU is in flight: the receive and
//! transmit paths of a serial transport are mutually exclusive by
//! construction (the driver's receiver and transmitter are never enabled
//! together), so a byte arriving mid-transmit is ignored by design.

pub mod ascii;
pub mod rtu;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testutil;

use crate::error::ModbusResult;
use crate::events::{EventQueue, MasterEvent, SlaveEvent};
use crate::pdu::Pdu;

/// A validated received frame handed to the dispatch layer
#[derive(Debug)]
pub struct ReceivedFrame {
    /// Source slave address; [`TCP_PSEUDO_ADDRESS`](crate::constants::TCP_PSEUDO_ADDRESS)
    /// for TCP frames
    pub address: u8,
    pub pdu: Pdu,
}

/// Transport FSM serving a slave engine
pub trait SlaveTransport: Send {
    /// Enter the startup settle state and enable the receiver
    fn start(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()>;

    /// Disable receiver, transmitter and timers
    fn stop(&mut self);

    /// Service pending I/O and timer expiry, posting events as they occur.
    /// This is the poll loop's bounded-blocking fallback; it never blocks
    /// longer than the driver's configured byte timeout.
    fn poll(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()>;

    /// Validate and take the captured frame after a `FrameReceived` event
    fn receive(&mut self) -> ModbusResult<ReceivedFrame>;

    /// Stage a response frame for transmission
    fn send(&mut self, address: u8, pdu: &[u8]) -> ModbusResult<()>;

    /// True when frames carry the TCP pseudo unit id instead of a bus slave
    /// address. Serial transports leave the default.
    fn uses_pseudo_address(&self) -> bool {
        false
    }

    /// Release the underlying port
    fn close(&mut self);
}

/// Transport FSM serving a master engine
///
/// Differs from the slave side in the post-send turnaround: after the last
/// byte leaves, the transport arms either the broadcast convert delay or the
/// respond timeout, and classifies the latter's expiry as a respond-timeout
/// error.
pub trait MasterTransport: Send {
    fn start(&mut self, events: &EventQueue<MasterEvent>) -> ModbusResult<()>;

    fn stop(&mut self);

    fn poll(&mut self, events: &EventQueue<MasterEvent>) -> ModbusResult<()>;

    fn receive(&mut self) -> ModbusResult<ReceivedFrame>;

    /// Stage a request frame. Fails if the receiver is not idle, i.e. a
    /// previous exchange is still on the wire.
    fn send(&mut self, address: u8, pdu: &[u8]) -> ModbusResult<()>;

    /// True when frames carry the TCP pseudo unit id instead of a bus slave
    /// address. Serial transports leave the default.
    fn uses_pseudo_address(&self) -> bool {
        false
    }

    fn close(&mut self);
}
