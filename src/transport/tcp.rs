//! TCP transport with MBAP framing
//!
//! MBAP header layout (7 bytes): transaction id, protocol id, length, unit
//! id. Length counts the unit id plus the PDU, so a valid body is 1 to 254
//! bytes beyond the header. Frames carry no checksum; TCP integrity is
//! trusted.
//!
//! A frame whose protocol id is not zero is drained and discarded while the
//! connection stays up. A length field that cannot be valid desynchronizes
//! the stream, so the peer connection is reset instead.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::codec::{read_u16, write_u16};
use crate::constants::{
    MAX_MBAP_LENGTH, MBAP_HEADER_SIZE, MBAP_PROTOCOL_ID, MAX_PDU_SIZE, TCP_PSEUDO_ADDRESS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::events::{EventQueue, MasterErrorKind, MasterEvent, SlaveEvent};
use crate::pdu::Pdu;
use crate::port::TcpChannel;

use super::{MasterTransport, ReceivedFrame, SlaveTransport};

const MBAP_TID_OFF: usize = 0;
const MBAP_PID_OFF: usize = 2;
const MBAP_LEN_OFF: usize = 4;
const MBAP_UID_OFF: usize = 6;

/// Bounded wait for a header when polling
const HEADER_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Once a header arrived the body must follow promptly
const BODY_TIMEOUT: Duration = Duration::from_millis(500);

struct MbapHeader {
    transaction_id: u16,
    protocol_id: u16,
    body_len: usize,
}

/// Read and validate one MBAP header. `Ok(None)` means no frame pending;
/// a `Frame` error means the stream is desynchronized and the peer must be
/// reset.
fn read_header<C: TcpChannel>(channel: &mut C) -> ModbusResult<Option<(MbapHeader, u8)>> {
    let mut header = [0u8; MBAP_HEADER_SIZE];
    if !channel.read_exact(&mut header, HEADER_POLL_TIMEOUT)? {
        return Ok(None);
    }
    let length = read_u16(&header, MBAP_LEN_OFF) as usize;
    if length < 2 || length > MAX_MBAP_LENGTH {
        return Err(ModbusError::Frame("MBAP length out of range"));
    }
    Ok(Some((
        MbapHeader {
            transaction_id: read_u16(&header, MBAP_TID_OFF),
            protocol_id: read_u16(&header, MBAP_PID_OFF),
            // The unit id is the last header byte but counts toward length
            body_len: length - 1,
        },
        header[MBAP_UID_OFF],
    )))
}

fn build_frame(
    out: &mut [u8; MBAP_HEADER_SIZE + MAX_PDU_SIZE],
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> ModbusResult<usize> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusError::Frame("PDU length out of range"));
    }
    write_u16(out, MBAP_TID_OFF, transaction_id);
    write_u16(out, MBAP_PID_OFF, MBAP_PROTOCOL_ID);
    write_u16(out, MBAP_LEN_OFF, (pdu.len() + 1) as u16);
    out[MBAP_UID_OFF] = unit_id;
    out[MBAP_HEADER_SIZE..MBAP_HEADER_SIZE + pdu.len()].copy_from_slice(pdu);
    Ok(MBAP_HEADER_SIZE + pdu.len())
}

// ============================================================================
// Slave role
// ============================================================================

/// MBAP transport for the slave engine, serving one request at a time
pub struct TcpSlaveTransport<C> {
    channel: C,
    /// Transaction id of the request being served, echoed in the response
    transaction_id: u16,
    unit_id: u8,
    frame: Option<Pdu>,
}

impl<C: TcpChannel> TcpSlaveTransport<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            transaction_id: 0,
            unit_id: TCP_PSEUDO_ADDRESS,
            frame: None,
        }
    }

    fn read_frame(&mut self) -> ModbusResult<bool> {
        let Some((header, unit_id)) = read_header(&mut self.channel)? else {
            return Ok(false);
        };
        let mut pdu = Pdu::new();
        pdu.set_len(header.body_len)?;
        if !self.channel.read_exact(pdu.as_mut_slice(), BODY_TIMEOUT)? {
            return Err(ModbusError::Frame("MBAP body truncated"));
        }
        if header.protocol_id != MBAP_PROTOCOL_ID {
            debug!(
                protocol_id = header.protocol_id,
                "discarding frame with unknown protocol id"
            );
            return Ok(false);
        }
        self.transaction_id = header.transaction_id;
        self.unit_id = unit_id;
        self.frame = Some(pdu);
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: TcpChannel> SlaveTransport for TcpSlaveTransport<C> {
    fn start(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()> {
        self.frame = None;
        events.post(SlaveEvent::Ready);
        Ok(())
    }

    fn stop(&mut self) {
        self.frame = None;
    }

    fn poll(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()> {
        match self.read_frame() {
            Ok(true) => {
                trace!(tid = self.transaction_id, "tcp request framed");
                events.post(SlaveEvent::FrameReceived);
            }
            Ok(false) => {}
            Err(ModbusError::Frame(reason)) => {
                warn!(reason, "resetting desynchronized tcp peer");
                self.channel.reset_peer();
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn receive(&mut self) -> ModbusResult<ReceivedFrame> {
        let pdu = self
            .frame
            .take()
            .ok_or(ModbusError::IllegalState("no frame captured"))?;
        Ok(ReceivedFrame {
            address: TCP_PSEUDO_ADDRESS,
            pdu,
        })
    }

    fn send(&mut self, _address: u8, pdu: &[u8]) -> ModbusResult<()> {
        let mut out = [0u8; MBAP_HEADER_SIZE + MAX_PDU_SIZE];
        let len = build_frame(&mut out, self.transaction_id, self.unit_id, pdu)?;
        self.channel.write_all(&out[..len])
    }

    fn uses_pseudo_address(&self) -> bool {
        true
    }

    fn close(&mut self) {
        self.channel.close();
    }
}

// ============================================================================
// Master role
// ============================================================================

/// MBAP transport for the master engine over one outbound connection
pub struct TcpMasterTransport<C> {
    channel: C,
    transaction_id: u16,
    respond_timeout: Duration,
    /// Set while a request awaits its response
    deadline: Option<Instant>,
    frame: Option<Pdu>,
}

impl<C: TcpChannel> TcpMasterTransport<C> {
    pub fn new(channel: C, respond_timeout: Duration) -> Self {
        Self {
            channel,
            transaction_id: 0,
            respond_timeout,
            deadline: None,
            frame: None,
        }
    }

    fn read_frame(&mut self) -> ModbusResult<bool> {
        let Some((header, _unit_id)) = read_header(&mut self.channel)? else {
            return Ok(false);
        };
        let mut pdu = Pdu::new();
        pdu.set_len(header.body_len)?;
        if !self.channel.read_exact(pdu.as_mut_slice(), BODY_TIMEOUT)? {
            return Err(ModbusError::Frame("MBAP body truncated"));
        }
        if header.protocol_id != MBAP_PROTOCOL_ID {
            debug!(
                protocol_id = header.protocol_id,
                "discarding response with unknown protocol id"
            );
            return Ok(false);
        }
        if header.transaction_id != self.transaction_id {
            debug!(
                got = header.transaction_id,
                want = self.transaction_id,
                "discarding stale transaction"
            );
            return Ok(false);
        }
        self.frame = Some(pdu);
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: TcpChannel> MasterTransport for TcpMasterTransport<C> {
    fn start(&mut self, events: &EventQueue<MasterEvent>) -> ModbusResult<()> {
        self.frame = None;
        self.deadline = None;
        events.post(MasterEvent::Ready);
        Ok(())
    }

    fn stop(&mut self) {
        self.deadline = None;
        self.frame = None;
    }

    fn poll(&mut self, events: &EventQueue<MasterEvent>) -> ModbusResult<()> {
        if self.deadline.is_none() {
            return Ok(());
        }
        match self.read_frame() {
            Ok(true) => {
                self.deadline = None;
                trace!(tid = self.transaction_id, "tcp response framed");
                events.post(MasterEvent::FrameReceived);
                return Ok(());
            }
            Ok(false) => {}
            Err(ModbusError::Frame(reason)) => {
                warn!(reason, "resetting desynchronized tcp connection");
                self.channel.reset_peer();
                self.deadline = None;
                events.post(MasterEvent::ErrorProcess(MasterErrorKind::ReceiveData));
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            debug!(tid = self.transaction_id, "tcp respond timeout");
            self.deadline = None;
            events.post(MasterEvent::ErrorProcess(MasterErrorKind::RespondTimeout));
        }
        Ok(())
    }

    fn receive(&mut self) -> ModbusResult<ReceivedFrame> {
        let pdu = self
            .frame
            .take()
            .ok_or(ModbusError::IllegalState("no frame captured"))?;
        Ok(ReceivedFrame {
            address: TCP_PSEUDO_ADDRESS,
            pdu,
        })
    }

    fn send(&mut self, address: u8, pdu: &[u8]) -> ModbusResult<()> {
        if self.deadline.is_some() {
            return Err(ModbusError::IllegalState("previous exchange still pending"));
        }
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let mut out = [0u8; MBAP_HEADER_SIZE + MAX_PDU_SIZE];
        let len = build_frame(&mut out, self.transaction_id, address, pdu)?;
        self.channel.write_all(&out[..len])?;
        self.deadline = Some(Instant::now() + self.respond_timeout);
        Ok(())
    }

    fn uses_pseudo_address(&self) -> bool {
        true
    }

    fn close(&mut self) {
        self.channel.close();
    }
}
