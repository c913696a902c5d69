//! End-to-end RTU exchanges over an in-memory serial link
//!
//! One master engine and one slave engine share a loopback wire; both poll
//! from the test thread while the blocking request runs on its own. The
//! inter-frame delay is stretched so the soft timers behave deterministically
//! against a byte stream that arrives instantly.

mod support;

use std::sync::Arc;
use std::time::Duration;

use modbus_engine::bank::{MemoryBank, Region};
use modbus_engine::client::MasterEngine;
use modbus_engine::constants::BROADCAST_ADDRESS;
use modbus_engine::error::RequestError;
use modbus_engine::port::SoftTimer;
use modbus_engine::server::SlaveEngine;
use modbus_engine::transport::rtu::{RtuMasterTransport, RtuSlaveTransport};

use support::{init_tracing, run_exchange, serial_pair};

// The slave settles faster than the master so it is already listening when
// the master's first request hits the wire
const SLAVE_T35: Duration = Duration::from_millis(10);
const MASTER_T35: Duration = Duration::from_millis(30);
const RESPOND_TIMEOUT: Duration = Duration::from_millis(250);
const CONVERT_DELAY: Duration = Duration::from_millis(50);
const SLAVE_ADDRESS: u8 = 10;

struct Bus {
    master_engine: MasterEngine,
    master: modbus_engine::client::Master,
    slave_engine: SlaveEngine,
    master_bank: Arc<MemoryBank>,
    slave_bank: Arc<MemoryBank>,
}

fn bus(slave_bank: Arc<MemoryBank>) -> Bus {
    init_tracing();
    let (master_end, slave_end) = serial_pair();
    let master_bank = Arc::new(MemoryBank::uniform(4096));

    let (mut master_engine, master) = MasterEngine::with_transport(
        Box::new(RtuMasterTransport::with_t35(
            master_end,
            SoftTimer::new(),
            MASTER_T35,
            RESPOND_TIMEOUT,
            CONVERT_DELAY,
        )),
        16,
        master_bank.clone(),
    );
    master_engine.enable().expect("enable master");

    let mut slave_engine = SlaveEngine::with_transport(
        Box::new(RtuSlaveTransport::with_t35(
            slave_end,
            SoftTimer::new(),
            SLAVE_T35,
        )),
        SLAVE_ADDRESS,
        slave_bank.clone(),
    );
    slave_engine.enable().expect("enable slave");

    Bus {
        master_engine,
        master,
        slave_engine,
        master_bank,
        slave_bank,
    }
}

#[test]
fn read_holding_registers_end_to_end() {
    let slave_bank = Arc::new(MemoryBank::new(
        Region::new(1, 8),
        Region::new(1, 8),
        Region::new(2001, 16),
        Region::new(1, 8),
    ));
    slave_bank.set_holding(2001, 0xCAFE).expect("seed");
    let mut b = bus(slave_bank);

    let master = b.master.clone();
    let result = run_exchange(&mut b.master_engine, &mut b.slave_engine, move || {
        // Wire address 2000 addresses logical register 2001
        master.read_holding_registers(SLAVE_ADDRESS, 2000, 1, None)
    });
    assert_eq!(result, Ok(()));
    assert_eq!(b.master_bank.holding(2001).expect("mirror"), 0xCAFE);
}

#[test]
fn unanswered_request_times_out_then_bus_recovers() {
    let mut b = bus(Arc::new(MemoryBank::uniform(64)));

    // Address 5 is silent; only address 10 exists on this bus
    let master = b.master.clone();
    let result = run_exchange(&mut b.master_engine, &mut b.slave_engine, move || {
        master.read_holding_registers(5, 0, 1, None)
    });
    assert_eq!(result, Err(RequestError::RespondTimeout));

    // The next request goes straight through
    b.slave_bank.set_holding(3, 77).expect("seed");
    let master = b.master.clone();
    let result = run_exchange(&mut b.master_engine, &mut b.slave_engine, move || {
        master.read_holding_registers(SLAVE_ADDRESS, 2, 1, None)
    });
    assert_eq!(result, Ok(()));
    assert_eq!(b.master_bank.holding(3).expect("mirror"), 77);
}

#[test]
fn out_of_range_read_surfaces_as_execute_error() {
    // Slave bank holds 16 registers; wire address 5000 is far outside
    let mut b = bus(Arc::new(MemoryBank::uniform(16)));

    let master = b.master.clone();
    let result = run_exchange(&mut b.master_engine, &mut b.slave_engine, move || {
        master.read_holding_registers(SLAVE_ADDRESS, 5000, 1, None)
    });
    assert_eq!(result, Err(RequestError::ExecuteFunction));
}

#[test]
fn write_single_coil_round_trip() {
    let mut b = bus(Arc::new(MemoryBank::uniform(64)));

    let master = b.master.clone();
    let result = run_exchange(&mut b.master_engine, &mut b.slave_engine, move || {
        master.write_single_coil(SLAVE_ADDRESS, 7, 0xFF00, None)
    });
    assert_eq!(result, Ok(()));
    assert!(b.slave_bank.coil(8).expect("slave coil"));
    assert!(b.master_bank.coil(8).expect("mirror coil"));
}

#[test]
fn broadcast_write_executes_everywhere_without_response() {
    let mut b = bus(Arc::new(MemoryBank::uniform(64)));

    let master = b.master.clone();
    let result = run_exchange(&mut b.master_engine, &mut b.slave_engine, move || {
        master.write_single_register(BROADCAST_ADDRESS, 0, 0x5AA5, None)
    });
    // No response expected; the convert delay completes the request
    assert_eq!(result, Ok(()));
    assert_eq!(b.slave_bank.holding(1).expect("slave"), 0x5AA5);
    assert_eq!(b.master_bank.holding(1).expect("mirror"), 0x5AA5);
}

#[test]
fn write_multiple_registers_round_trip() {
    let mut b = bus(Arc::new(MemoryBank::uniform(64)));

    let master = b.master.clone();
    let result = run_exchange(&mut b.master_engine, &mut b.slave_engine, move || {
        master.write_multiple_registers(SLAVE_ADDRESS, 20, &[0x1111, 0x2222, 0x3333], None)
    });
    assert_eq!(result, Ok(()));
    assert_eq!(b.slave_bank.holding(21).expect("slave"), 0x1111);
    assert_eq!(b.slave_bank.holding(22).expect("slave"), 0x2222);
    assert_eq!(b.slave_bank.holding(23).expect("slave"), 0x3333);
}
