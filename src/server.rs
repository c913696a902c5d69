//! Slave (responder) protocol engine
//!
//! [`SlaveEngine`] drives one transport from a cooperative poll loop: the
//! application calls [`poll`](SlaveEngine::poll) repeatedly, the engine
//! drains transport events, filters received frames by address, dispatches
//! the PDU to the function handler table and stages the response.
//!
//! Handlers rewrite the request PDU into the response in place. Any handler
//! error becomes an exception response; a handler miss becomes Illegal
//! Function. Broadcast requests execute but are never answered, exceptions
//! included.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::bank::{AccessMode, RegisterBank};
use crate::codec::{bit_byte_count, read_u16};
use crate::config::{EngineMode, SlaveConfig};
use crate::constants::{
    BROADCAST_ADDRESS, FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_READ_WRITE_MULTIPLE_REGISTERS, FC_REPORT_SLAVE_ID,
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE, MAX_READWRITE_READ_REGISTERS,
    MAX_READWRITE_WRITE_REGISTERS, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS,
    MAX_WRITE_REGISTERS, TCP_PSEUDO_ADDRESS,
};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::events::{EventQueue, SlaveEvent};
use crate::pdu::Pdu;
use crate::port::serial::SerialPortDriver;
use crate::port::tcp::TcpServer;
use crate::port::SoftTimer;
use crate::transport::ascii::AsciiSlaveTransport;
use crate::transport::rtu::RtuSlaveTransport;
use crate::transport::tcp::TcpSlaveTransport;
use crate::transport::{ReceivedFrame, SlaveTransport};

/// Everything a function handler may touch
struct HandlerCtx<'a> {
    bank: &'a dyn RegisterBank,
    slave_id: &'a [u8],
}

type FuncHandler = fn(&HandlerCtx<'_>, &mut Pdu) -> Result<(), ExceptionCode>;

/// Function handler dispatch table, searched linearly since it is tiny
const HANDLERS: &[(u8, FuncHandler)] = &[
    (FC_READ_COILS, read_coils),
    (FC_READ_DISCRETE_INPUTS, read_discrete_inputs),
    (FC_READ_HOLDING_REGISTERS, read_holding_registers),
    (FC_READ_INPUT_REGISTERS, read_input_registers),
    (FC_WRITE_SINGLE_COIL, write_single_coil),
    (FC_WRITE_SINGLE_REGISTER, write_single_register),
    (FC_WRITE_MULTIPLE_COILS, write_multiple_coils),
    (FC_WRITE_MULTIPLE_REGISTERS, write_multiple_registers),
    (FC_REPORT_SLAVE_ID, report_slave_id),
    (FC_READ_WRITE_MULTIPLE_REGISTERS, read_write_multiple_registers),
];

// ============================================================================
// Function handlers
// ============================================================================

/// Logical register address: wire address plus one, wrapping like the
/// 16-bit arithmetic it replaces
fn logical(wire: u16) -> u16 {
    wire.wrapping_add(1)
}

fn map_register(err: crate::error::RegisterError) -> ExceptionCode {
    ExceptionCode::from_register_error(err)
}

fn read_bits(
    ctx: &HandlerCtx<'_>,
    pdu: &mut Pdu,
    discrete: bool,
) -> Result<(), ExceptionCode> {
    if pdu.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = logical(read_u16(pdu.as_slice(), 1));
    let count = read_u16(pdu.as_slice(), 3);
    if count < 1 || count > MAX_READ_BITS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let byte_count = bit_byte_count(count);
    let full = pdu.as_full_mut();
    full[1] = byte_count as u8;
    let result = if discrete {
        ctx.bank
            .discrete_inputs(&mut full[2..2 + byte_count], address, count, AccessMode::Read)
    } else {
        ctx.bank
            .coils(&mut full[2..2 + byte_count], address, count, AccessMode::Read)
    };
    result.map_err(map_register)?;
    pdu.set_len(2 + byte_count)
        .map_err(|_| ExceptionCode::SlaveDeviceFailure)
}

fn read_coils(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    read_bits(ctx, pdu, false)
}

fn read_discrete_inputs(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    read_bits(ctx, pdu, true)
}

fn read_words(
    ctx: &HandlerCtx<'_>,
    pdu: &mut Pdu,
    input: bool,
) -> Result<(), ExceptionCode> {
    if pdu.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = logical(read_u16(pdu.as_slice(), 1));
    let count = read_u16(pdu.as_slice(), 3);
    if count < 1 || count > MAX_READ_REGISTERS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let byte_count = 2 * count as usize;
    let full = pdu.as_full_mut();
    full[1] = byte_count as u8;
    let result = if input {
        ctx.bank
            .input_registers(&mut full[2..2 + byte_count], address, count, AccessMode::Read)
    } else {
        ctx.bank
            .holding_registers(&mut full[2..2 + byte_count], address, count, AccessMode::Read)
    };
    result.map_err(map_register)?;
    pdu.set_len(2 + byte_count)
        .map_err(|_| ExceptionCode::SlaveDeviceFailure)
}

fn read_holding_registers(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    read_words(ctx, pdu, false)
}

fn read_input_registers(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    read_words(ctx, pdu, true)
}

fn write_single_coil(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    if pdu.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = logical(read_u16(pdu.as_slice(), 1));
    let value = read_u16(pdu.as_slice(), 3);
    // Only the two canonical encodings are valid
    let mut bit = match value {
        0xFF00 => [1u8],
        0x0000 => [0u8],
        _ => return Err(ExceptionCode::IllegalDataValue),
    };
    ctx.bank
        .coils(&mut bit, address, 1, AccessMode::Write)
        .map_err(map_register)?;
    // Response echoes the request
    Ok(())
}

fn write_single_register(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    if pdu.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = logical(read_u16(pdu.as_slice(), 1));
    let data = pdu.as_mut_slice();
    let mut word = [data[3], data[4]];
    ctx.bank
        .holding_registers(&mut word, address, 1, AccessMode::Write)
        .map_err(map_register)?;
    Ok(())
}

fn write_multiple_coils(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    if pdu.len() < 7 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = logical(read_u16(pdu.as_slice(), 1));
    let count = read_u16(pdu.as_slice(), 3);
    let byte_count = pdu.as_slice()[5] as usize;
    if count < 1 || count > MAX_WRITE_BITS || byte_count != bit_byte_count(count) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if pdu.len() != 6 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    ctx.bank
        .coils(
            &mut pdu.as_mut_slice()[6..6 + byte_count],
            address,
            count,
            AccessMode::Write,
        )
        .map_err(map_register)?;
    // Response: function code, start address, quantity
    pdu.truncate(5);
    Ok(())
}

fn write_multiple_registers(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    if pdu.len() < 8 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = logical(read_u16(pdu.as_slice(), 1));
    let count = read_u16(pdu.as_slice(), 3);
    let byte_count = pdu.as_slice()[5] as usize;
    if count < 1 || count > MAX_WRITE_REGISTERS || byte_count != 2 * count as usize {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if pdu.len() != 6 + byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    ctx.bank
        .holding_registers(
            &mut pdu.as_mut_slice()[6..6 + byte_count],
            address,
            count,
            AccessMode::Write,
        )
        .map_err(map_register)?;
    pdu.truncate(5);
    Ok(())
}

fn report_slave_id(ctx: &HandlerCtx<'_>, pdu: &mut Pdu) -> Result<(), ExceptionCode> {
    if pdu.len() != 1 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let payload = ctx.slave_id;
    let full = pdu.as_full_mut();
    full[1] = payload.len() as u8;
    full[2..2 + payload.len()].copy_from_slice(payload);
    pdu.set_len(2 + payload.len())
        .map_err(|_| ExceptionCode::SlaveDeviceFailure)
}

fn read_write_multiple_registers(
    ctx: &HandlerCtx<'_>,
    pdu: &mut Pdu,
) -> Result<(), ExceptionCode> {
    if pdu.len() < 12 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let read_address = logical(read_u16(pdu.as_slice(), 1));
    let read_count = read_u16(pdu.as_slice(), 3);
    let write_address = logical(read_u16(pdu.as_slice(), 5));
    let write_count = read_u16(pdu.as_slice(), 7);
    let write_bytes = pdu.as_slice()[9] as usize;
    if read_count < 1
        || read_count > MAX_READWRITE_READ_REGISTERS
        || write_count < 1
        || write_count > MAX_READWRITE_WRITE_REGISTERS
        || write_bytes != 2 * write_count as usize
        || pdu.len() != 10 + write_bytes
    {
        return Err(ExceptionCode::IllegalDataValue);
    }
    // The write is performed before the read
    ctx.bank
        .holding_registers(
            &mut pdu.as_mut_slice()[10..10 + write_bytes],
            write_address,
            write_count,
            AccessMode::Write,
        )
        .map_err(map_register)?;
    let read_bytes = 2 * read_count as usize;
    let full = pdu.as_full_mut();
    full[1] = read_bytes as u8;
    ctx.bank
        .holding_registers(
            &mut full[2..2 + read_bytes],
            read_address,
            read_count,
            AccessMode::Read,
        )
        .map_err(map_register)?;
    pdu.set_len(2 + read_bytes)
        .map_err(|_| ExceptionCode::SlaveDeviceFailure)
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Disabled,
    Enabled,
}

/// The slave protocol engine
pub struct SlaveEngine {
    transport: Box<dyn SlaveTransport>,
    events: EventQueue<SlaveEvent>,
    bank: Arc<dyn RegisterBank>,
    address: u8,
    slave_id: Vec<u8>,
    frame: Option<ReceivedFrame>,
    state: EngineState,
}

impl SlaveEngine {
    /// Build an engine with the transport selected by `config`
    pub fn new(config: SlaveConfig, bank: Arc<dyn RegisterBank>) -> ModbusResult<Self> {
        let config = config.validate()?;
        let transport: Box<dyn SlaveTransport> = match config.mode {
            EngineMode::Rtu => Box::new(RtuSlaveTransport::new(
                SerialPortDriver::open(&config.serial)?,
                SoftTimer::new(),
                config.serial.baud_rate,
            )),
            EngineMode::Ascii => Box::new(AsciiSlaveTransport::new(
                SerialPortDriver::open(&config.serial)?,
                SoftTimer::new(),
            )),
            EngineMode::Tcp => Box::new(TcpSlaveTransport::new(TcpServer::listen(
                config.tcp_port,
            )?)),
        };
        info!(mode = ?config.mode, address = config.address, "slave engine created");
        Ok(Self::with_transport(transport, config.address, bank))
    }

    /// Build an engine over an already constructed transport
    pub fn with_transport(
        transport: Box<dyn SlaveTransport>,
        address: u8,
        bank: Arc<dyn RegisterBank>,
    ) -> Self {
        Self {
            transport,
            events: EventQueue::new(),
            bank,
            address,
            // Default Report Slave ID payload: id byte plus run indicator
            slave_id: vec![address, 0xFF],
            frame: None,
            state: EngineState::Disabled,
        }
    }

    /// Set the Report Slave ID payload: id byte, run indicator and
    /// device-specific additional bytes
    pub fn set_slave_id(
        &mut self,
        slave_id: u8,
        running: bool,
        additional: &[u8],
    ) -> ModbusResult<()> {
        // fc + byte count precede the payload in the response PDU
        if 2 + additional.len() > MAX_PDU_SIZE - 2 {
            return Err(ModbusError::InsufficientResources(
                "slave id payload too long",
            ));
        }
        self.slave_id.clear();
        self.slave_id.push(slave_id);
        self.slave_id.push(if running { 0xFF } else { 0x00 });
        self.slave_id.extend_from_slice(additional);
        Ok(())
    }

    /// Start the transport and accept requests
    pub fn enable(&mut self) -> ModbusResult<()> {
        if self.state == EngineState::Enabled {
            return Err(ModbusError::IllegalState("engine already enabled"));
        }
        self.transport.start(&self.events)?;
        self.state = EngineState::Enabled;
        info!(address = self.address, "slave engine enabled");
        Ok(())
    }

    /// Stop accepting requests; the engine can be re-enabled later
    pub fn disable(&mut self) {
        self.transport.stop();
        self.events.clear();
        self.frame = None;
        self.state = EngineState::Disabled;
        info!(address = self.address, "slave engine disabled");
    }

    /// Release the transport. The engine must be disabled first.
    pub fn close(mut self) -> ModbusResult<()> {
        if self.state == EngineState::Enabled {
            return Err(ModbusError::IllegalState("disable the engine before close"));
        }
        self.transport.close();
        Ok(())
    }

    /// One poll-loop iteration: service transport I/O, then drain and handle
    /// all pending events. Call this repeatedly from the application's loop.
    pub fn poll(&mut self) -> ModbusResult<()> {
        if self.state != EngineState::Enabled {
            return Err(ModbusError::IllegalState("engine not enabled"));
        }
        self.transport.poll(&self.events)?;
        while let Some(event) = self.events.get() {
            match event {
                SlaveEvent::Ready => debug!("slave transport ready"),
                SlaveEvent::FrameReceived => self.on_frame_received(),
                SlaveEvent::Execute => self.on_execute()?,
                SlaveEvent::FrameSent => trace!("response staged"),
            }
        }
        Ok(())
    }

    fn accepts(&self, address: u8) -> bool {
        address == self.address
            || address == BROADCAST_ADDRESS
            || (address == TCP_PSEUDO_ADDRESS && self.transport.uses_pseudo_address())
    }

    fn on_frame_received(&mut self) {
        match self.transport.receive() {
            Ok(frame) => {
                if self.accepts(frame.address) {
                    trace!(address = frame.address, pdu = ?frame.pdu, "request accepted");
                    self.frame = Some(frame);
                    self.events.post(SlaveEvent::Execute);
                } else {
                    // Not ours; another slave on the bus will answer
                    trace!(address = frame.address, "request for another slave");
                }
            }
            // Framing errors are dropped silently, the master's timeout
            // handles recovery
            Err(e) => debug!(error = %e, "dropping invalid frame"),
        }
    }

    fn on_execute(&mut self) -> ModbusResult<()> {
        let Some(frame) = self.frame.take() else {
            return Ok(());
        };
        let broadcast = frame.address == BROADCAST_ADDRESS;
        let mut pdu = frame.pdu;
        let Some(fc) = pdu.function_code() else {
            debug!("empty PDU dropped");
            return Ok(());
        };

        let ctx = HandlerCtx {
            bank: self.bank.as_ref(),
            slave_id: &self.slave_id,
        };
        let handler = HANDLERS.iter().find(|(code, _)| *code == fc);
        let result = match handler {
            Some((_, handler)) => handler(&ctx, &mut pdu),
            None => Err(ExceptionCode::IllegalFunction),
        };
        if let Err(code) = result {
            debug!(fc, ?code, "request failed");
            pdu.make_exception(fc, code);
        }

        if broadcast {
            trace!(fc, "broadcast executed, no response");
            return Ok(());
        }
        self.transport.send(frame.address, pdu.as_slice())?;
        self.events.post(SlaveEvent::FrameSent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{MemoryBank, Region};
    use crate::error::ModbusError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Scripted transport: tests queue inbound frames and inspect responses
    #[derive(Default)]
    struct ScriptedTransport {
        inbound: Mutex<VecDeque<ReceivedFrame>>,
        sent: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    }

    impl SlaveTransport for ScriptedTransport {
        fn start(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()> {
            events.post(SlaveEvent::Ready);
            Ok(())
        }

        fn stop(&mut self) {}

        fn poll(&mut self, events: &EventQueue<SlaveEvent>) -> ModbusResult<()> {
            if !self.inbound.lock().is_empty() {
                events.post(SlaveEvent::FrameReceived);
            }
            Ok(())
        }

        fn receive(&mut self) -> ModbusResult<ReceivedFrame> {
            self.inbound
                .lock()
                .pop_front()
                .ok_or(ModbusError::IllegalState("no frame"))
        }

        fn send(&mut self, address: u8, pdu: &[u8]) -> ModbusResult<()> {
            self.sent.lock().push((address, pdu.to_vec()));
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn engine_with_bank(address: u8, bank: Arc<MemoryBank>) -> (SlaveEngine, Arc<Mutex<Vec<(u8, Vec<u8>)>>>) {
        let transport = ScriptedTransport::default();
        let sent = transport.sent.clone();
        let mut engine = SlaveEngine::with_transport(Box::new(transport), address, bank);
        engine.enable().unwrap();
        (engine, sent)
    }

    fn push_request(engine: &mut SlaveEngine, address: u8, pdu: &[u8]) {
        engine.frame = Some(ReceivedFrame {
            address,
            pdu: Pdu::from_slice(pdu).unwrap(),
        });
        engine.events.post(SlaveEvent::Execute);
        engine.poll().unwrap();
    }

    fn last_sent(sent: &Arc<Mutex<Vec<(u8, Vec<u8>)>>>) -> Option<(u8, Vec<u8>)> {
        sent.lock().last().cloned()
    }

    #[test]
    fn read_holding_registers_maps_wire_address_up_by_one() {
        let bank = Arc::new(MemoryBank::new(
            Region::new(1, 8),
            Region::new(1, 8),
            Region::new(2001, 16),
            Region::new(1, 8),
        ));
        bank.set_holding(2001, 0x1234).unwrap();
        bank.set_holding(2002, 0xABCD).unwrap();
        let (mut engine, sent) = engine_with_bank(10, bank);

        // Wire address 2000 reads logical register 2001
        push_request(&mut engine, 10, &[0x03, 0x07, 0xD0, 0x00, 0x02]);
        let (addr, pdu) = last_sent(&sent).unwrap();
        assert_eq!(addr, 10);
        assert_eq!(pdu, vec![0x03, 0x04, 0x12, 0x34, 0xAB, 0xCD]);
    }

    #[test]
    fn unknown_function_gets_illegal_function_exception() {
        let (mut engine, sent) = engine_with_bank(1, Arc::new(MemoryBank::uniform(16)));
        push_request(&mut engine, 1, &[0x2B, 0x0E, 0x01]);
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0xAB, 0x01]);
    }

    #[test]
    fn out_of_range_read_gets_illegal_data_address() {
        let (mut engine, sent) = engine_with_bank(1, Arc::new(MemoryBank::uniform(16)));
        // Wire 100 -> logical 101, outside the 16-register bank
        push_request(&mut engine, 1, &[0x03, 0x00, 0x64, 0x00, 0x01]);
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0x83, 0x02]);
    }

    #[test]
    fn oversized_count_gets_illegal_data_value() {
        let (mut engine, sent) = engine_with_bank(1, Arc::new(MemoryBank::uniform(16)));
        // 126 registers exceeds the FC03 limit of 125
        push_request(&mut engine, 1, &[0x03, 0x00, 0x00, 0x00, 0x7E]);
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0x83, 0x03]);
    }

    #[test]
    fn write_single_coil_canonical_values_only() {
        let bank = Arc::new(MemoryBank::uniform(16));
        let (mut engine, sent) = engine_with_bank(1, bank.clone());

        push_request(&mut engine, 1, &[0x05, 0x00, 0x04, 0xFF, 0x00]);
        let (_, pdu) = last_sent(&sent).unwrap();
        // Echo of the request
        assert_eq!(pdu, vec![0x05, 0x00, 0x04, 0xFF, 0x00]);
        assert!(bank.coil(5).unwrap());

        // 0x1234 is not a valid coil encoding
        push_request(&mut engine, 1, &[0x05, 0x00, 0x05, 0x12, 0x34]);
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0x85, 0x03]);
        assert!(!bank.coil(6).unwrap());
    }

    #[test]
    fn write_single_register() {
        let bank = Arc::new(MemoryBank::uniform(16));
        let (mut engine, sent) = engine_with_bank(1, bank.clone());
        push_request(&mut engine, 1, &[0x06, 0x00, 0x02, 0xBE, 0xEF]);
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0x06, 0x00, 0x02, 0xBE, 0xEF]);
        assert_eq!(bank.holding(3).unwrap(), 0xBEEF);
    }

    #[test]
    fn write_multiple_coils_and_registers() {
        let bank = Arc::new(MemoryBank::uniform(32));
        let (mut engine, sent) = engine_with_bank(1, bank.clone());

        // Ten coils starting at wire 0, pattern 0b11_0000_0101
        push_request(
            &mut engine,
            1,
            &[0x0F, 0x00, 0x00, 0x00, 0x0A, 0x02, 0x05, 0x03],
        );
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0x0F, 0x00, 0x00, 0x00, 0x0A]);
        assert!(bank.coil(1).unwrap());
        assert!(!bank.coil(2).unwrap());
        assert!(bank.coil(3).unwrap());
        assert!(bank.coil(9).unwrap());
        assert!(bank.coil(10).unwrap());

        push_request(
            &mut engine,
            1,
            &[0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x11, 0x22, 0x33, 0x44],
        );
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0x10, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(bank.holding(1).unwrap(), 0x1122);
        assert_eq!(bank.holding(2).unwrap(), 0x3344);
    }

    #[test]
    fn byte_count_mismatch_rejected() {
        let bank = Arc::new(MemoryBank::uniform(32));
        let (mut engine, sent) = engine_with_bank(1, bank.clone());
        // Two registers claim 3 data bytes
        push_request(
            &mut engine,
            1,
            &[0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x11, 0x22, 0x33],
        );
        let (_, pdu) = last_sent(&sent).unwrap();
        assert_eq!(pdu, vec![0x90, 0x03]);
        assert_eq!(bank.holding(1).unwrap(), 0);
    }

    #[test]
    fn read_write_multiple_writes_before_reading() {
        let bank = Arc::new(MemoryBank::uniform(32));
        let (mut engine, sent) = engine_with_bank(1, bank.clone());
        // Read 2 registers at wire 0 while writing those same registers
        push_request(
            &mut engine,
            1,
            &[0x17, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x02, 0x04, 0x0A, 0x0B, 0x0C, 0x0D],
        );
        let (_, pdu) = last_sent(&sent).unwrap();
        // The read observes the freshly written values
        assert_eq!(pdu, vec![0x17, 0x04, 0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn report_slave_id_payload() {
        let bank = Arc::new(MemoryBank::uniform(8));
        let (mut engine, sent) = engine_with_bank(7, bank);
        engine.set_slave_id(0x42, true, b"pump-3").unwrap();

        push_request(&mut engine, 7, &[0x11]);
        let (_, pdu) = last_sent(&sent).unwrap();
        let mut expected = vec![0x11, 8, 0x42, 0xFF];
        expected.extend_from_slice(b"pump-3");
        assert_eq!(pdu, expected);
    }

    #[test]
    fn slave_id_payload_length_limit() {
        let bank = Arc::new(MemoryBank::uniform(8));
        let (mut engine, _) = engine_with_bank(7, bank);
        let too_long = vec![0u8; MAX_PDU_SIZE];
        assert!(matches!(
            engine.set_slave_id(1, true, &too_long),
            Err(ModbusError::InsufficientResources(_))
        ));
    }

    #[test]
    fn broadcast_executes_without_response() {
        let bank = Arc::new(MemoryBank::uniform(16));
        let (mut engine, sent) = engine_with_bank(1, bank.clone());
        push_request(&mut engine, BROADCAST_ADDRESS, &[0x06, 0x00, 0x00, 0x00, 0x2A]);
        assert!(sent.lock().is_empty());
        assert_eq!(bank.holding(1).unwrap(), 0x002A);

        // Broadcast exceptions are suppressed too
        push_request(&mut engine, BROADCAST_ADDRESS, &[0x03, 0x00, 0x64, 0x00, 0x01]);
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn frames_for_other_slaves_are_ignored() {
        let transport = ScriptedTransport::default();
        let sent = transport.sent.clone();
        transport.inbound.lock().push_back(ReceivedFrame {
            address: 9,
            pdu: Pdu::from_slice(&[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap(),
        });
        let mut engine =
            SlaveEngine::with_transport(Box::new(transport), 10, Arc::new(MemoryBank::uniform(8)));
        engine.enable().unwrap();
        engine.poll().unwrap();
        engine.poll().unwrap();
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn pseudo_address_ignored_on_serial_transport() {
        let transport = ScriptedTransport::default();
        let sent = transport.sent.clone();
        transport.inbound.lock().push_back(ReceivedFrame {
            address: TCP_PSEUDO_ADDRESS,
            pdu: Pdu::from_slice(&[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap(),
        });
        let mut engine =
            SlaveEngine::with_transport(Box::new(transport), 10, Arc::new(MemoryBank::uniform(8)));
        engine.enable().unwrap();
        engine.poll().unwrap();
        engine.poll().unwrap();
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn poll_requires_enable() {
        let transport = ScriptedTransport::default();
        let mut engine =
            SlaveEngine::with_transport(Box::new(transport), 1, Arc::new(MemoryBank::uniform(8)));
        assert!(engine.poll().is_err());
        engine.enable().unwrap();
        assert!(engine.enable().is_err());
        engine.poll().unwrap();
        engine.disable();
        assert!(engine.poll().is_err());
    }
}
