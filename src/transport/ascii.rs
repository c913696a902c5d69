//! ASCII transport FSMs
//!
//! ASCII frames are delimited by explicit characters instead of bus
//! silence: a `:` starts a frame, CR LF ends it, and the binary payload
//! (address + PDU + LRC) travels as uppercase hex nibble pairs. A one
//! second inter-character guard timer aborts a stalled frame; it plays no
//! part in delimiting.
//!
//! The master role shares the RTU turnaround discipline: after the last
//! character leaves, it arms the broadcast convert delay or the respond
//! timeout, and a `:` arriving before expiry hands control to the receiver.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::checksum::lrc_valid;
use crate::constants::{
    ASCII_CR, ASCII_INTER_CHAR_TIMEOUT_MS, ASCII_LF, ASCII_START, BROADCAST_ADDRESS, MAX_PDU_SIZE,
    MAX_SER_ADU_SIZE, SER_ADU_ADDR_OFF, SER_ADU_PDU_OFF,
};
use crate::error::{ModbusError, ModbusResult};
use crate::events::{EventQueue, MasterErrorKind, MasterEvent, SlaveEvent};
use crate::pdu::Pdu;
use crate::port::{SerialDriver, TimerDriver};

use super::{MasterTransport, ReceivedFrame, SlaveTransport};

const BYTE_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Guard timeout between characters of one frame
const INTER_CHAR_TIMEOUT: Duration = Duration::from_millis(ASCII_INTER_CHAR_TIMEOUT_MS);

/// `:` + two hex chars per binary byte + CR LF
const ASCII_FRAME_MAX: usize = 1 + 2 * MAX_SER_ADU_SIZE + 2;

/// Minimum binary frame: address + function code + LRC
const MIN_BIN_FRAME: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    /// Receiving hex pairs; the flag tracks which nibble comes next
    Receiving { high_nibble: bool },
    /// CR seen, expecting LF
    WaitEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Active,
    AwaitingTurnaround,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerMode {
    InterChar,
    RespondTimeout,
    ConvertDelay,
}

fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

fn hex_char(nibble: u8) -> u8 {
    match nibble {
        0..=9 => b'0' + nibble,
        _ => b'A' + nibble - 10,
    }
}

/// Encode `address + pdu + lrc` as a full ASCII frame, returning its length
fn build_frame(out: &mut [u8; ASCII_FRAME_MAX], address: u8, pdu: &[u8]) -> ModbusResult<usize> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusError::Frame("PDU length out of range"));
    }
    let mut sum = address;
    let mut pos = 0;
    out[pos] = ASCII_START;
    pos += 1;

    let put = |out: &mut [u8; ASCII_FRAME_MAX], pos: &mut usize, byte: u8| {
        out[*pos] = hex_char(byte >> 4);
        out[*pos + 1] = hex_char(byte & 0x0F);
        *pos += 2;
    };

    put(out, &mut pos, address);
    for byte in pdu {
        put(out, &mut pos, *byte);
        sum = sum.wrapping_add(*byte);
    }
    put(out, &mut pos, sum.wrapping_neg());
    out[pos] = ASCII_CR;
    out[pos + 1] = ASCII_LF;
    Ok(pos + 2)
}

/// Binary receive core shared by both roles
struct AsciiRx {
    state: RxState,
    buf: [u8; MAX_SER_ADU_SIZE],
    pos: usize,
    current: u8,
}

impl AsciiRx {
    fn new() -> Self {
        Self {
            state: RxState::Idle,
            buf: [0; MAX_SER_ADU_SIZE],
            pos: 0,
            current: 0,
        }
    }

    /// Process one received character. Returns true when a complete frame
    /// (CR LF seen) is in the buffer.
    fn on_char(&mut self, ch: u8) -> bool {
        if ch == ASCII_START {
            // A start delimiter always restarts capture, even mid-frame
            self.state = RxState::Receiving { high_nibble: true };
            self.pos = 0;
            return false;
        }
        match self.state {
            RxState::Idle => false,
            RxState::Receiving { high_nibble } => {
                if ch == ASCII_CR {
                    self.state = RxState::WaitEof;
                    return false;
                }
                match hex_value(ch) {
                    Some(v) if high_nibble => {
                        self.current = v << 4;
                        self.state = RxState::Receiving { high_nibble: false };
                    }
                    Some(v) => {
                        if self.pos < MAX_SER_ADU_SIZE {
                            self.buf[self.pos] = self.current | v;
                            self.pos += 1;
                            self.state = RxState::Receiving { high_nibble: true };
                        } else {
                            warn!("ASCII frame overflow, dropping frame");
                            self.state = RxState::Idle;
                        }
                    }
                    None => {
                        debug!(ch, "unexpected character in ASCII frame");
                        self.state = RxState::Idle;
                    }
                }
                false
            }
            RxState::WaitEof => {
                self.state = RxState::Idle;
                ch == ASCII_LF
            }
        }
    }

    fn take_frame(&self) -> ModbusResult<ReceivedFrame> {
        let frame = &self.buf[..self.pos];
        if frame.len() < MIN_BIN_FRAME || !lrc_valid(frame) {
            return Err(ModbusError::Frame("bad length or LRC"));
        }
        Ok(ReceivedFrame {
            address: frame[SER_ADU_ADDR_OFF],
            pdu: Pdu::from_slice(&frame[SER_ADU_PDU_OFF..frame.len() - 1])?,
        })
    }
}

// ============================================================================
// Slave role
// ============================================================================

/// ASCII transport for the slave (responder) role
pub struct AsciiSlaveTransport<S, T> {
    serial: S,
    timer: T,
    rx: AsciiRx,
    tx_state: TxState,
    tx_buf: [u8; ASCII_FRAME_MAX],
    tx_len: usize,
    tx_pos: usize,
}

impl<S: SerialDriver, T: TimerDriver> AsciiSlaveTransport<S, T> {
    pub fn new(serial: S, timer: T) -> Self {
        Self {
            serial,
            timer,
            rx: AsciiRx::new(),
            tx_state: TxState::Idle,
            tx_buf: [0; ASCII_FRAME_MAX],
            tx_len: 0,
            tx_pos: 0,
        }
    }

    fn on_transmitter_empty(&mut self) -> ModbusResult<()> {
        if self.tx_pos < self.tx_len {
            self.serial.write_byte(self.tx_buf[self.tx_pos])?;
            self.tx_pos += 1;
        }
        if self.tx_pos == self.tx_len {
            self.tx_state = TxState::Idle;
            self.serial.enable(true, false);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn parts_mut(&mut self) -> (&mut S, &mut T) {
        (&mut self.serial, &mut self.timer)
    }
}

impl<S: SerialDriver, T: TimerDriver> SlaveTransport for AsciiSlaveTransport<S, T> {
    fn start(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()> {
        self.serial.set_timeout(BYTE_POLL_TIMEOUT)?;
        self.rx = AsciiRx::new();
        self.tx_state = TxState::Idle;
        self.serial.enable(true, false);
        // Explicit delimiters need no settle delay
        events.post(SlaveEvent::Ready);
        Ok(())
    }

    fn stop(&mut self) {
        self.serial.enable(false, false);
        self.timer.disable();
    }

    fn poll(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()> {
        while self.tx_state == TxState::Active {
            self.on_transmitter_empty()?;
        }
        while let Some(ch) = self.serial.read_byte()? {
            if self.rx.on_char(ch) {
                self.timer.disable();
                trace!(len = self.rx.pos, "ASCII frame delimited");
                events.post(SlaveEvent::FrameReceived);
            } else if self.rx.state != RxState::Idle {
                self.timer.arm(INTER_CHAR_TIMEOUT);
            }
        }
        if self.timer.poll_expired() {
            debug!("ASCII inter-character timeout, dropping frame");
            self.rx.state = RxState::Idle;
        }
        Ok(())
    }

    fn receive(&mut self) -> ModbusResult<ReceivedFrame> {
        self.rx.take_frame()
    }

    fn send(&mut self, address: u8, pdu: &[u8]) -> ModbusResult<()> {
        if self.rx.state != RxState::Idle {
            return Err(ModbusError::IllegalState("receiver not idle"));
        }
        self.tx_len = build_frame(&mut self.tx_buf, address, pdu)?;
        self.tx_pos = 0;
        self.tx_state = TxState::Active;
        self.serial.enable(false, true);
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
        self.serial.close();
    }
}

// ============================================================================
// Master role
// ============================================================================

/// ASCII transport for the master (initiator) role
pub struct AsciiMasterTransport<S, T> {
    serial: S,
    timer: T,
    respond_timeout: Duration,
    convert_delay: Duration,
    timer_mode: TimerMode,
    broadcast: bool,
    rx: AsciiRx,
    tx_state: TxState,
    tx_buf: [u8; ASCII_FRAME_MAX],
    tx_len: usize,
    tx_pos: usize,
}

impl<S: SerialDriver, T: TimerDriver> AsciiMasterTransport<S, T> {
    pub fn new(serial: S, timer: T, respond_timeout: Duration, convert_delay: Duration) -> Self {
        Self {
            serial,
            timer,
            respond_timeout,
            convert_delay,
            timer_mode: TimerMode::InterChar,
            broadcast: false,
            rx: AsciiRx::new(),
            tx_state: TxState::Idle,
            tx_buf: [0; ASCII_FRAME_MAX],
            tx_len: 0,
            tx_pos: 0,
        }
    }

    fn on_char(&mut self, ch: u8, events: &EventQueue<MasterEvent>) {
        if ch == ASCII_START && self.tx_state == TxState::AwaitingTurnaround {
            // Response begins: cancel the respond timer, receiver takes over
            self.timer.disable();
            self.tx_state = TxState::Idle;
        }
        if self.rx.on_char(ch) {
            self.timer.disable();
            trace!(len = self.rx.pos, "ASCII response delimited");
            events.post(MasterEvent::FrameReceived);
        } else if self.rx.state != RxState::Idle {
            self.timer_mode = TimerMode::InterChar;
            self.timer.arm(INTER_CHAR_TIMEOUT);
        }
    }

    fn on_timer_expired(&mut self, events: &EventQueue<MasterEvent>) {
        match self.timer_mode {
            TimerMode::InterChar => {
                if self.rx.state != RxState::Idle {
                    debug!("ASCII response stalled mid-frame");
                    self.rx.state = RxState::Idle;
                    events.post(MasterEvent::ErrorProcess(MasterErrorKind::ReceiveData));
                }
            }
            TimerMode::RespondTimeout => {
                if self.tx_state == TxState::AwaitingTurnaround && !self.broadcast {
                    debug!("respond timeout expired");
                    events.post(MasterEvent::ErrorProcess(MasterErrorKind::RespondTimeout));
                }
                self.tx_state = TxState::Idle;
            }
            TimerMode::ConvertDelay => {
                self.tx_state = TxState::Idle;
                events.post(MasterEvent::Execute);
            }
        }
        self.timer_mode = TimerMode::InterChar;
    }

    fn on_transmitter_empty(&mut self) -> ModbusResult<()> {
        if self.tx_pos < self.tx_len {
            self.serial.write_byte(self.tx_buf[self.tx_pos])?;
            self.tx_pos += 1;
        }
        if self.tx_pos == self.tx_len {
            self.serial.enable(true, false);
            self.tx_state = TxState::AwaitingTurnaround;
            if self.broadcast {
                self.timer_mode = TimerMode::ConvertDelay;
                self.timer.arm(self.convert_delay);
            } else {
                self.timer_mode = TimerMode::RespondTimeout;
                self.timer.arm(self.respond_timeout);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn parts_mut(&mut self) -> (&mut S, &mut T) {
        (&mut self.serial, &mut self.timer)
    }
}

impl<S: SerialDriver, T: TimerDriver> MasterTransport for AsciiMasterTransport<S, T> {
    fn start(&mut self, events: &EventQueue<MasterEvent>) -> ModbusResult<()> {
        self.serial.set_timeout(BYTE_POLL_TIMEOUT)?;
        self.rx = AsciiRx::new();
        self.tx_state = TxState::Idle;
        self.serial.enable(true, false);
        events.post(MasterEvent::Ready);
        Ok(())
    }

    fn stop(&mut self) {
        self.serial.enable(false, false);
        self.timer.disable();
    }

    fn poll(&mut self, events: &EventQueue<MasterEvent>) -> ModbusResult<()> {
        while self.tx_state == TxState::Active {
            self.on_transmitter_empty()?;
        }
        while let Some(ch) = self.serial.read_byte()? {
            self.on_char(ch, events);
        }
        if self.timer.poll_expired() {
            self.on_timer_expired(events);
        }
        Ok(())
    }

    fn receive(&mut self) -> ModbusResult<ReceivedFrame> {
        self.rx.take_frame()
    }

    fn send(&mut self, address: u8, pdu: &[u8]) -> ModbusResult<()> {
        if self.rx.state != RxState::Idle {
            return Err(ModbusError::IllegalState("receiver not idle"));
        }
        self.broadcast = address == BROADCAST_ADDRESS;
        self.tx_len = build_frame(&mut self.tx_buf, address, pdu)?;
        self.tx_pos = 0;
        self.tx_state = TxState::Active;
        self.serial.enable(false, true);
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
        self.serial.close();
    }
}
