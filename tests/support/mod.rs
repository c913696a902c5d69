//! Shared fixtures for engine integration tests

// Not every test binary uses every fixture
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;

use modbus_engine::client::MasterEngine;
use modbus_engine::error::{ModbusError, ModbusResult};
use modbus_engine::port::SerialDriver;
use modbus_engine::server::SlaveEngine;

/// Opt-in log capture: run with `TEST_LOG=1` to see engine traces
pub fn init_tracing() {
    static INIT: Once = Once::new();
    if std::env::var_os("TEST_LOG").is_none() {
        return;
    }
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    });
}

/// One direction of an in-memory serial link
type Wire = Arc<Mutex<VecDeque<u8>>>;

/// In-memory serial endpoint; what one side writes the other reads
pub struct LoopbackSerial {
    rx: Wire,
    tx: Wire,
    rx_enabled: bool,
    tx_enabled: bool,
}

/// Create two connected endpoints
pub fn serial_pair() -> (LoopbackSerial, LoopbackSerial) {
    let a_to_b: Wire = Arc::new(Mutex::new(VecDeque::new()));
    let b_to_a: Wire = Arc::new(Mutex::new(VecDeque::new()));
    (
        LoopbackSerial {
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
            rx_enabled: false,
            tx_enabled: false,
        },
        LoopbackSerial {
            rx: a_to_b,
            tx: b_to_a,
            rx_enabled: false,
            tx_enabled: false,
        },
    )
}

impl SerialDriver for LoopbackSerial {
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
        Ok(self.rx.lock().pop_front())
    }

    fn write_byte(&mut self, byte: u8) -> ModbusResult<()> {
        if !self.tx_enabled {
            return Err(ModbusError::IllegalState("transmitter not enabled"));
        }
        self.tx.lock().push_back(byte);
        Ok(())
    }

    fn close(&mut self) {
        self.rx_enabled = false;
        self.tx_enabled = false;
    }
}

/// Run one blocking master request while polling both engines on this
/// thread until the requester finishes
pub fn run_exchange<R: Send + 'static>(
    master_engine: &mut MasterEngine,
    slave_engine: &mut SlaveEngine,
    request: impl FnOnce() -> R + Send + 'static,
) -> R {
    let handle = std::thread::spawn(request);
    while !handle.is_finished() {
        master_engine.poll().expect("master poll");
        slave_engine.poll().expect("slave poll");
        std::thread::sleep(Duration::from_millis(1));
    }
    handle.join().expect("request thread")
}
