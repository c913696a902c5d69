//! Master (initiator) protocol engine and request API
//!
//! The master splits into two halves sharing state through an `Arc`:
//!
//! - [`Master`] is the blocking request API handed to application threads.
//!   A request acquires the single in-flight permit, stages its PDU, posts
//!   `FrameSent` and blocks on the completion signal.
//! - [`MasterEngine`] is the poll half. The application drives
//!   [`poll`](MasterEngine::poll) from one loop (typically its own thread);
//!   the engine pushes staged requests to the transport, validates
//!   responses, mirrors received data into the register bank and resolves
//!   the blocked requester with a terminal outcome.
//!
//! Received read data and confirmed writes are mirrored into the engine's
//! [`RegisterBank`], so the bank always reflects the last data seen from the
//! bus. A [`MasterErrorListener`] observes every request completion before
//! the permit is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::bank::{AccessMode, RegisterBank};
use crate::codec::{bit_byte_count, pack_bits, read_u16};
use crate::config::{EngineMode, MasterConfig};
use crate::constants::{
    BROADCAST_ADDRESS, FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_READ_WRITE_MULTIPLE_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
    MAX_READWRITE_READ_REGISTERS, MAX_READWRITE_WRITE_REGISTERS, MAX_READ_BITS,
    MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS, TCP_PSEUDO_ADDRESS,
};
use crate::error::{ModbusError, ModbusResult, RequestError};
use crate::events::{
    EventQueue, MasterErrorKind, MasterEvent, RequestOutcome, RunToken, WaitSignal,
};
use crate::pdu::Pdu;
use crate::port::serial::SerialPortDriver;
use crate::port::tcp::TcpClient;
use crate::port::SoftTimer;
use crate::transport::ascii::AsciiMasterTransport;
use crate::transport::rtu::RtuMasterTransport;
use crate::transport::tcp::TcpMasterTransport;
use crate::transport::MasterTransport;

/// Observer of master request completions
///
/// All callbacks run on the poll loop, before the in-flight permit is
/// released, so an implementation sees completions strictly in request
/// order. The default implementation ignores everything.
pub trait MasterErrorListener: Send + Sync {
    /// The slave did not answer within the respond timeout
    fn on_respond_timeout(&self, _destination: u8, _request: &[u8]) {}

    /// A frame arrived but failed framing or responder-address validation
    fn on_receive_error(&self, _destination: u8, _request: &[u8]) {}

    /// The response was an exception or failed response validation
    fn on_execute_error(&self, _destination: u8, _request: &[u8]) {}

    /// The request completed successfully
    fn on_success(&self, _destination: u8) {}
}

struct NoopListener;

impl MasterErrorListener for NoopListener {}

struct PendingRequest {
    destination: u8,
    request: Pdu,
    /// Created by the requester for this request alone; the poll engine
    /// delivers the outcome through it, so outcomes cannot cross between
    /// callers racing for the permit
    signal: Arc<WaitSignal>,
}

/// State shared between the request API and the poll engine
struct MasterShared {
    token: RunToken,
    events: EventQueue<MasterEvent>,
    pending: Mutex<Option<PendingRequest>>,
    enabled: AtomicBool,
}

// ============================================================================
// Request API
// ============================================================================

/// Blocking request handle, cloneable across application threads
#[derive(Clone)]
pub struct Master {
    shared: Arc<MasterShared>,
    total_slaves: u8,
    /// The transport addresses the peer through its connection and uses the
    /// pseudo unit id (TCP)
    pseudo_address: bool,
}

impl Master {
    /// Acquire the in-flight permit, stage the request and block until the
    /// poll engine resolves it.
    fn execute(
        &self,
        destination: u8,
        request: Pdu,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        // On TCP the connection addresses the slave; only there may the
        // pseudo unit id bypass the bus bound
        let tcp_peer = destination == TCP_PSEUDO_ADDRESS && self.pseudo_address;
        if !tcp_peer && destination > self.total_slaves {
            return Err(RequestError::IllegalArgument);
        }
        if !self.shared.enabled.load(Ordering::Acquire) {
            return Err(RequestError::NotEnabled);
        }
        if !self.shared.token.take(timeout) {
            return Err(RequestError::MasterBusy);
        }
        let signal = Arc::new(WaitSignal::new());
        *self.shared.pending.lock() = Some(PendingRequest {
            destination,
            request,
            signal: signal.clone(),
        });
        self.shared.events.post(MasterEvent::FrameSent);
        match signal.wait() {
            RequestOutcome::Success => Ok(()),
            RequestOutcome::RespondTimeout => Err(RequestError::RespondTimeout),
            RequestOutcome::ReceiveData => Err(RequestError::ReceiveData),
            RequestOutcome::ExecuteFunction => Err(RequestError::ExecuteFunction),
        }
    }

    fn read_request(
        &self,
        fc: u8,
        destination: u8,
        address: u16,
        count: u16,
        limit: u16,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        if count < 1 || count > limit {
            return Err(RequestError::IllegalArgument);
        }
        let pdu = build_pdu(|pdu| {
            pdu.push(fc)?;
            pdu.push_u16(address)?;
            pdu.push_u16(count)
        })?;
        self.execute(destination, pdu, timeout)
    }

    /// Read Coils (FC01)
    pub fn read_coils(
        &self,
        destination: u8,
        address: u16,
        count: u16,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        self.read_request(FC_READ_COILS, destination, address, count, MAX_READ_BITS, timeout)
    }

    /// Read Discrete Inputs (FC02)
    pub fn read_discrete_inputs(
        &self,
        destination: u8,
        address: u16,
        count: u16,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        self.read_request(
            FC_READ_DISCRETE_INPUTS,
            destination,
            address,
            count,
            MAX_READ_BITS,
            timeout,
        )
    }

    /// Read Holding Registers (FC03)
    pub fn read_holding_registers(
        &self,
        destination: u8,
        address: u16,
        count: u16,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        self.read_request(
            FC_READ_HOLDING_REGISTERS,
            destination,
            address,
            count,
            MAX_READ_REGISTERS,
            timeout,
        )
    }

    /// Read Input Registers (FC04)
    pub fn read_input_registers(
        &self,
        destination: u8,
        address: u16,
        count: u16,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        self.read_request(
            FC_READ_INPUT_REGISTERS,
            destination,
            address,
            count,
            MAX_READ_REGISTERS,
            timeout,
        )
    }

    /// Write Single Coil (FC05). `value` must be one of the two canonical
    /// encodings, 0xFF00 (on) or 0x0000 (off).
    pub fn write_single_coil(
        &self,
        destination: u8,
        address: u16,
        value: u16,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        if value != 0xFF00 && value != 0x0000 {
            return Err(RequestError::IllegalArgument);
        }
        let pdu = build_pdu(|pdu| {
            pdu.push(FC_WRITE_SINGLE_COIL)?;
            pdu.push_u16(address)?;
            pdu.push_u16(value)
        })?;
        self.execute(destination, pdu, timeout)
    }

    /// Write Single Register (FC06)
    pub fn write_single_register(
        &self,
        destination: u8,
        address: u16,
        value: u16,
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        let pdu = build_pdu(|pdu| {
            pdu.push(FC_WRITE_SINGLE_REGISTER)?;
            pdu.push_u16(address)?;
            pdu.push_u16(value)
        })?;
        self.execute(destination, pdu, timeout)
    }

    /// Write Multiple Coils (FC15)
    pub fn write_multiple_coils(
        &self,
        destination: u8,
        address: u16,
        values: &[bool],
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        let count = values.len() as u16;
        if values.is_empty() || count > MAX_WRITE_BITS {
            return Err(RequestError::IllegalArgument);
        }
        let byte_count = bit_byte_count(count);
        let mut packed = [0u8; (MAX_WRITE_BITS as usize + 7) / 8];
        pack_bits(values, &mut packed[..byte_count]);
        let pdu = build_pdu(|pdu| {
            pdu.push(FC_WRITE_MULTIPLE_COILS)?;
            pdu.push_u16(address)?;
            pdu.push_u16(count)?;
            pdu.push(byte_count as u8)?;
            pdu.extend(&packed[..byte_count])
        })?;
        self.execute(destination, pdu, timeout)
    }

    /// Write Multiple Registers (FC16)
    pub fn write_multiple_registers(
        &self,
        destination: u8,
        address: u16,
        values: &[u16],
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        let count = values.len() as u16;
        if values.is_empty() || count > MAX_WRITE_REGISTERS {
            return Err(RequestError::IllegalArgument);
        }
        let pdu = build_pdu(|pdu| {
            pdu.push(FC_WRITE_MULTIPLE_REGISTERS)?;
            pdu.push_u16(address)?;
            pdu.push_u16(count)?;
            pdu.push(2 * count as u8)?;
            for value in values {
                pdu.push_u16(*value)?;
            }
            Ok(())
        })?;
        self.execute(destination, pdu, timeout)
    }

    /// Read/Write Multiple Registers (FC23). The write is performed by the
    /// slave before the read.
    pub fn read_write_multiple_registers(
        &self,
        destination: u8,
        read_address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
        timeout: Option<Duration>,
    ) -> Result<(), RequestError> {
        let write_count = values.len() as u16;
        if read_count < 1
            || read_count > MAX_READWRITE_READ_REGISTERS
            || values.is_empty()
            || write_count > MAX_READWRITE_WRITE_REGISTERS
        {
            return Err(RequestError::IllegalArgument);
        }
        let pdu = build_pdu(|pdu| {
            pdu.push(FC_READ_WRITE_MULTIPLE_REGISTERS)?;
            pdu.push_u16(read_address)?;
            pdu.push_u16(read_count)?;
            pdu.push_u16(write_address)?;
            pdu.push_u16(write_count)?;
            pdu.push(2 * write_count as u8)?;
            for value in values {
                pdu.push_u16(*value)?;
            }
            Ok(())
        })?;
        self.execute(destination, pdu, timeout)
    }
}

fn build_pdu(
    fill: impl FnOnce(&mut Pdu) -> ModbusResult<()>,
) -> Result<Pdu, RequestError> {
    let mut pdu = Pdu::new();
    fill(&mut pdu).map_err(|_| RequestError::IllegalArgument)?;
    Ok(pdu)
}

// ============================================================================
// Response handling
// ============================================================================

/// Logical register address: wire address plus one
fn logical(wire: u16) -> u16 {
    wire.wrapping_add(1)
}

/// Validate one response against its request and mirror the carried data
/// into the bank. `response == None` means broadcast: write requests apply
/// their payload, read requests have nothing to mirror.
fn apply_response(
    bank: &dyn RegisterBank,
    request: &Pdu,
    response: Option<&Pdu>,
) -> Result<(), RequestOutcome> {
    let req = request.as_slice();
    let fc = req[0];
    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            let Some(resp) = response else { return Ok(()) };
            let count = read_u16(req, 3);
            let byte_count = bit_byte_count(count);
            let data = resp.as_slice();
            if data.len() != 2 + byte_count || data[1] as usize != byte_count {
                return Err(RequestOutcome::ExecuteFunction);
            }
            let mut bits = [0u8; (MAX_READ_BITS as usize + 7) / 8];
            bits[..byte_count].copy_from_slice(&data[2..]);
            let address = logical(read_u16(req, 1));
            let result = if fc == FC_READ_COILS {
                bank.coils(&mut bits[..byte_count], address, count, AccessMode::Write)
            } else {
                bank.discrete_inputs(&mut bits[..byte_count], address, count, AccessMode::Write)
            };
            result.map_err(|_| RequestOutcome::ExecuteFunction)
        }
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            let Some(resp) = response else { return Ok(()) };
            let count = read_u16(req, 3);
            let byte_count = 2 * count as usize;
            let data = resp.as_slice();
            if data.len() != 2 + byte_count || data[1] as usize != byte_count {
                return Err(RequestOutcome::ExecuteFunction);
            }
            let mut words = [0u8; 2 * MAX_READ_REGISTERS as usize];
            words[..byte_count].copy_from_slice(&data[2..]);
            let address = logical(read_u16(req, 1));
            let result = if fc == FC_READ_HOLDING_REGISTERS {
                bank.holding_registers(&mut words[..byte_count], address, count, AccessMode::Write)
            } else {
                bank.input_registers(&mut words[..byte_count], address, count, AccessMode::Write)
            };
            result.map_err(|_| RequestOutcome::ExecuteFunction)
        }
        FC_WRITE_SINGLE_COIL => {
            if let Some(resp) = response {
                // The response is an echo of the request
                if resp.as_slice() != req {
                    return Err(RequestOutcome::ExecuteFunction);
                }
            }
            let address = logical(read_u16(req, 1));
            let mut bit = [u8::from(read_u16(req, 3) == 0xFF00)];
            bank.coils(&mut bit, address, 1, AccessMode::Write)
                .map_err(|_| RequestOutcome::ExecuteFunction)
        }
        FC_WRITE_SINGLE_REGISTER => {
            if let Some(resp) = response {
                if resp.as_slice() != req {
                    return Err(RequestOutcome::ExecuteFunction);
                }
            }
            let address = logical(read_u16(req, 1));
            let mut word = [req[3], req[4]];
            bank.holding_registers(&mut word, address, 1, AccessMode::Write)
                .map_err(|_| RequestOutcome::ExecuteFunction)
        }
        FC_WRITE_MULTIPLE_COILS => {
            let count = read_u16(req, 3);
            if let Some(resp) = response {
                // Response: fc, start address, quantity
                if resp.as_slice() != &req[..5] {
                    return Err(RequestOutcome::ExecuteFunction);
                }
            }
            let byte_count = req[5] as usize;
            let address = logical(read_u16(req, 1));
            let mut bits = [0u8; (MAX_WRITE_BITS as usize + 7) / 8];
            bits[..byte_count].copy_from_slice(&req[6..6 + byte_count]);
            bank.coils(&mut bits[..byte_count], address, count, AccessMode::Write)
                .map_err(|_| RequestOutcome::ExecuteFunction)
        }
        FC_WRITE_MULTIPLE_REGISTERS => {
            let count = read_u16(req, 3);
            if let Some(resp) = response {
                if resp.as_slice() != &req[..5] {
                    return Err(RequestOutcome::ExecuteFunction);
                }
            }
            let byte_count = req[5] as usize;
            let address = logical(read_u16(req, 1));
            let mut words = [0u8; 2 * MAX_WRITE_REGISTERS as usize];
            words[..byte_count].copy_from_slice(&req[6..6 + byte_count]);
            bank.holding_registers(&mut words[..byte_count], address, count, AccessMode::Write)
                .map_err(|_| RequestOutcome::ExecuteFunction)
        }
        FC_READ_WRITE_MULTIPLE_REGISTERS => {
            // Mirror the write half from the request first
            let write_address = logical(read_u16(req, 5));
            let write_count = read_u16(req, 7);
            let write_bytes = req[9] as usize;
            let mut words = [0u8; 2 * MAX_READWRITE_WRITE_REGISTERS as usize];
            words[..write_bytes].copy_from_slice(&req[10..10 + write_bytes]);
            bank.holding_registers(
                &mut words[..write_bytes],
                write_address,
                write_count,
                AccessMode::Write,
            )
            .map_err(|_| RequestOutcome::ExecuteFunction)?;

            let Some(resp) = response else { return Ok(()) };
            let read_count = read_u16(req, 3);
            let read_bytes = 2 * read_count as usize;
            let data = resp.as_slice();
            if data.len() != 2 + read_bytes || data[1] as usize != read_bytes {
                return Err(RequestOutcome::ExecuteFunction);
            }
            let read_address = logical(read_u16(req, 1));
            let mut read_words = [0u8; 2 * MAX_READWRITE_READ_REGISTERS as usize];
            read_words[..read_bytes].copy_from_slice(&data[2..]);
            bank.holding_registers(
                &mut read_words[..read_bytes],
                read_address,
                read_count,
                AccessMode::Write,
            )
            .map_err(|_| RequestOutcome::ExecuteFunction)
        }
        _ => Err(RequestOutcome::ExecuteFunction),
    }
}

// ============================================================================
// Poll engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Disabled,
    Enabled,
}

/// The master protocol engine, driven by the application's poll loop
pub struct MasterEngine {
    transport: Box<dyn MasterTransport>,
    shared: Arc<MasterShared>,
    bank: Arc<dyn RegisterBank>,
    listener: Arc<dyn MasterErrorListener>,
    total_slaves: u8,
    response: Option<Pdu>,
    /// A staged request could not be pushed yet (transport still settling);
    /// retry on the next poll
    send_pending: bool,
    state: EngineState,
}

impl MasterEngine {
    /// Build an engine and its request handle with the transport selected
    /// by `config`
    pub fn new(
        config: MasterConfig,
        bank: Arc<dyn RegisterBank>,
    ) -> ModbusResult<(Self, Master)> {
        let config = config.validate()?;
        let transport: Box<dyn MasterTransport> = match config.mode {
            EngineMode::Rtu => Box::new(RtuMasterTransport::new(
                SerialPortDriver::open(&config.serial)?,
                SoftTimer::new(),
                config.serial.baud_rate,
                config.respond_timeout,
                config.convert_delay,
            )),
            EngineMode::Ascii => Box::new(AsciiMasterTransport::new(
                SerialPortDriver::open(&config.serial)?,
                SoftTimer::new(),
                config.respond_timeout,
                config.convert_delay,
            )),
            EngineMode::Tcp => Box::new(TcpMasterTransport::new(
                TcpClient::connect(config.tcp_peer.as_str())?,
                config.respond_timeout,
            )),
        };
        info!(mode = ?config.mode, total_slaves = config.total_slaves, "master engine created");
        Ok(Self::with_transport(transport, config.total_slaves, bank))
    }

    /// Build an engine over an already constructed transport
    pub fn with_transport(
        transport: Box<dyn MasterTransport>,
        total_slaves: u8,
        bank: Arc<dyn RegisterBank>,
    ) -> (Self, Master) {
        let shared = Arc::new(MasterShared {
            token: RunToken::new(),
            events: EventQueue::new(),
            pending: Mutex::new(None),
            enabled: AtomicBool::new(false),
        });
        let master = Master {
            shared: shared.clone(),
            total_slaves,
            pseudo_address: transport.uses_pseudo_address(),
        };
        let engine = Self {
            transport,
            shared,
            bank,
            listener: Arc::new(NoopListener),
            total_slaves,
            response: None,
            send_pending: false,
            state: EngineState::Disabled,
        };
        (engine, master)
    }

    /// Install a request completion observer
    pub fn set_listener(&mut self, listener: Arc<dyn MasterErrorListener>) {
        self.listener = listener;
    }

    /// Start the transport and accept requests
    pub fn enable(&mut self) -> ModbusResult<()> {
        if self.state == EngineState::Enabled {
            return Err(ModbusError::IllegalState("engine already enabled"));
        }
        self.transport.start(&self.shared.events)?;
        self.state = EngineState::Enabled;
        self.shared.enabled.store(true, Ordering::Release);
        info!("master engine enabled");
        Ok(())
    }

    /// Stop accepting requests. Refused while a request is in flight.
    pub fn disable(&mut self) -> ModbusResult<()> {
        if self.shared.pending.lock().is_some() {
            return Err(ModbusError::IllegalState("request in flight"));
        }
        self.shared.enabled.store(false, Ordering::Release);
        self.transport.stop();
        self.shared.events.clear();
        self.response = None;
        self.send_pending = false;
        self.state = EngineState::Disabled;
        info!("master engine disabled");
        Ok(())
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
    /// all pending events
    pub fn poll(&mut self) -> ModbusResult<()> {
        if self.state != EngineState::Enabled {
            return Err(ModbusError::IllegalState("engine not enabled"));
        }
        self.transport.poll(&self.shared.events)?;
        if self.send_pending {
            self.on_frame_sent();
        }
        while let Some(event) = self.shared.events.get() {
            match event {
                MasterEvent::Ready => debug!("master transport ready"),
                MasterEvent::FrameSent => self.on_frame_sent(),
                MasterEvent::FrameReceived => self.on_frame_received(),
                MasterEvent::Execute => self.on_execute(),
                MasterEvent::ErrorProcess(kind) => self.on_error(kind),
            }
        }
        Ok(())
    }

    fn on_frame_sent(&mut self) {
        let (destination, request) = {
            let pending = self.shared.pending.lock();
            let Some(pending) = pending.as_ref() else {
                return;
            };
            (pending.destination, pending.request.clone())
        };
        trace!(destination, request = ?request, "sending request");
        match self.transport.send(destination, request.as_slice()) {
            Ok(()) => self.send_pending = false,
            // The transport is still settling or finishing a turnaround;
            // keep the request staged and retry on the next poll
            Err(ModbusError::IllegalState(_)) => self.send_pending = true,
            Err(e) => {
                warn!(error = %e, "request send failed");
                self.send_pending = false;
                self.resolve(RequestOutcome::ReceiveData);
            }
        }
    }

    fn on_frame_received(&mut self) {
        let expected = {
            let pending = self.shared.pending.lock();
            match pending.as_ref() {
                Some(p) => p.destination,
                // Nothing in flight; stale frame
                None => return,
            }
        };
        match self.transport.receive() {
            Ok(frame) => {
                let pseudo = frame.address == TCP_PSEUDO_ADDRESS
                    && self.transport.uses_pseudo_address();
                if frame.address == expected || pseudo {
                    self.response = Some(frame.pdu);
                    self.shared.events.post(MasterEvent::Execute);
                } else {
                    debug!(
                        got = frame.address,
                        expected, "response from unexpected slave"
                    );
                    self.shared
                        .events
                        .post(MasterEvent::ErrorProcess(MasterErrorKind::ReceiveData));
                }
            }
            Err(e) => {
                debug!(error = %e, "response frame invalid");
                self.shared
                    .events
                    .post(MasterEvent::ErrorProcess(MasterErrorKind::ReceiveData));
            }
        }
    }

    fn on_execute(&mut self) {
        let request = {
            let pending = self.shared.pending.lock();
            match pending.as_ref() {
                Some(p) => p.request.clone(),
                None => return,
            }
        };
        let broadcast = {
            let pending = self.shared.pending.lock();
            pending.as_ref().map(|p| p.destination) == Some(BROADCAST_ADDRESS)
        };

        if broadcast {
            // A broadcast has no response; the convert delay posted this
            // event. Every slave on the bus executed the request, so mirror
            // it once per configured slave.
            let mut outcome = RequestOutcome::Success;
            for _ in 1..=self.total_slaves {
                if let Err(err) = apply_response(self.bank.as_ref(), &request, None) {
                    outcome = err;
                }
            }
            self.resolve(outcome);
            return;
        }

        let Some(response) = self.response.take() else {
            return;
        };
        if response.is_exception() {
            debug!(code = ?response.exception_code(), "slave reported exception");
            self.resolve(RequestOutcome::ExecuteFunction);
            return;
        }
        if response.function_code() != request.function_code() {
            debug!("response function code does not match request");
            self.resolve(RequestOutcome::ExecuteFunction);
            return;
        }
        match apply_response(self.bank.as_ref(), &request, Some(&response)) {
            Ok(()) => self.resolve(RequestOutcome::Success),
            Err(outcome) => self.resolve(outcome),
        }
    }

    fn on_error(&mut self, kind: MasterErrorKind) {
        let outcome = match kind {
            MasterErrorKind::RespondTimeout => RequestOutcome::RespondTimeout,
            MasterErrorKind::ReceiveData => RequestOutcome::ReceiveData,
            MasterErrorKind::ExecuteFunction => RequestOutcome::ExecuteFunction,
        };
        self.resolve(outcome);
    }

    /// Complete the in-flight request: observer first, then permit release,
    /// then the requester wakeup
    fn resolve(&mut self, outcome: RequestOutcome) {
        let Some(pending) = self.shared.pending.lock().take() else {
            return;
        };
        self.response = None;
        self.send_pending = false;
        match outcome {
            RequestOutcome::Success => self.listener.on_success(pending.destination),
            RequestOutcome::RespondTimeout => self
                .listener
                .on_respond_timeout(pending.destination, pending.request.as_slice()),
            RequestOutcome::ReceiveData => self
                .listener
                .on_receive_error(pending.destination, pending.request.as_slice()),
            RequestOutcome::ExecuteFunction => self
                .listener
                .on_execute_error(pending.destination, pending.request.as_slice()),
        }
        self.shared.token.release();
        pending.signal.notify(outcome);
    }
}
