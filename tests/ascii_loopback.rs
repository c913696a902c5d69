//! End-to-end ASCII exchanges over an in-memory serial link

mod support;

use std::sync::Arc;
use std::time::Duration;

use modbus_engine::bank::MemoryBank;
use modbus_engine::client::MasterEngine;
use modbus_engine::error::RequestError;
use modbus_engine::port::SoftTimer;
use modbus_engine::server::SlaveEngine;
use modbus_engine::transport::ascii::{AsciiMasterTransport, AsciiSlaveTransport};

use support::{init_tracing, run_exchange, serial_pair};

const RESPOND_TIMEOUT: Duration = Duration::from_millis(250);
const CONVERT_DELAY: Duration = Duration::from_millis(50);
const SLAVE_ADDRESS: u8 = 3;

fn bus() -> (MasterEngine, modbus_engine::client::Master, SlaveEngine, Arc<MemoryBank>, Arc<MemoryBank>) {
    init_tracing();
    let (master_end, slave_end) = serial_pair();
    let master_bank = Arc::new(MemoryBank::uniform(256));
    let slave_bank = Arc::new(MemoryBank::uniform(256));

    let (mut master_engine, master) = MasterEngine::with_transport(
        Box::new(AsciiMasterTransport::new(
            master_end,
            SoftTimer::new(),
            RESPOND_TIMEOUT,
            CONVERT_DELAY,
        )),
        16,
        master_bank.clone(),
    );
    master_engine.enable().expect("enable master");

    let mut slave_engine = SlaveEngine::with_transport(
        Box::new(AsciiSlaveTransport::new(slave_end, SoftTimer::new())),
        SLAVE_ADDRESS,
        slave_bank.clone(),
    );
    slave_engine.enable().expect("enable slave");

    (master_engine, master, slave_engine, master_bank, slave_bank)
}

#[test]
fn read_and_write_registers_end_to_end() {
    let (mut master_engine, master, mut slave_engine, master_bank, slave_bank) = bus();
    slave_bank.set_holding(6, 0xA55A).expect("seed");

    let m = master.clone();
    let result = run_exchange(&mut master_engine, &mut slave_engine, move || {
        m.read_holding_registers(SLAVE_ADDRESS, 5, 1, None)
    });
    assert_eq!(result, Ok(()));
    assert_eq!(master_bank.holding(6).expect("mirror"), 0xA55A);

    let m = master.clone();
    let result = run_exchange(&mut master_engine, &mut slave_engine, move || {
        m.write_single_register(SLAVE_ADDRESS, 9, 0x0042, None)
    });
    assert_eq!(result, Ok(()));
    assert_eq!(slave_bank.holding(10).expect("slave"), 0x0042);
}

#[test]
fn silent_address_times_out() {
    let (mut master_engine, master, mut slave_engine, _, _) = bus();

    let result = run_exchange(&mut master_engine, &mut slave_engine, move || {
        master.read_holding_registers(8, 0, 1, None)
    });
    assert_eq!(result, Err(RequestError::RespondTimeout));
}
