//! Register access callback boundary
//!
//! The engine holds no register storage. Function handlers carry address,
//! count and read/write intent across the [`RegisterBank`] trait; what backs
//! an implementation — sensors, memory, GPIO — is irrelevant to the protocol.
//!
//! Addresses at this boundary are logical: the engine convention maps wire
//! address 0 to logical address 1, so handlers pass `wire + 1`.
//!
//! Register data crosses the boundary as big-endian byte pairs, bit regions
//! as LSB-first packed bytes, matching the wire encoding so handlers can
//! move payloads without re-marshalling.
//!
//! [`MemoryBank`] is a plain in-memory implementation for applications that
//! just need addressable storage, and for tests.

use parking_lot::Mutex;

use crate::codec::{bit_byte_count, pack_bits, read_u16, unpack_bits, write_u16};
use crate::error::RegisterError;

/// Read or write intent of a register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Application-implemented register access callback, one method per
/// register class.
///
/// On `Read` the implementation fills `buf`; on `Write` it consumes `buf`.
/// A range not fully inside the region must report
/// [`RegisterError::NoSuchRegister`], which the engine turns into an
/// Illegal Data Address exception.
pub trait RegisterBank: Send + Sync {
    /// Coils: single-bit, read/write. `buf` holds `ceil(count/8)` packed
    /// bytes.
    fn coils(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError>;

    /// Discrete inputs: single-bit. Read-only on the slave side; a master
    /// engine writes them to mirror polled slave data.
    fn discrete_inputs(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError>;

    /// Holding registers: 16-bit, read/write. `buf` holds `2 * count`
    /// big-endian bytes.
    fn holding_registers(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError>;

    /// Input registers: 16-bit. Read-only on the slave side; a master
    /// engine writes them to mirror polled slave data.
    fn input_registers(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError>;
}

/// Layout of one [`MemoryBank`] region: logical start address and element
/// count
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub start: u16,
    pub count: u16,
}

impl Region {
    pub fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    /// Offset of `address..address + count` inside this region, if the
    /// range lies fully within it
    fn locate(&self, address: u16, count: u16) -> Result<usize, RegisterError> {
        let end = address as u32 + count as u32;
        if address >= self.start && end <= self.start as u32 + self.count as u32 {
            Ok((address - self.start) as usize)
        } else {
            Err(RegisterError::NoSuchRegister)
        }
    }
}

#[derive(Debug)]
struct MemoryBankInner {
    coils: Vec<bool>,
    discretes: Vec<bool>,
    holdings: Vec<u16>,
    inputs: Vec<u16>,
}

/// In-memory register bank with one configurable region per register class
#[derive(Debug)]
pub struct MemoryBank {
    coil_region: Region,
    discrete_region: Region,
    holding_region: Region,
    input_region: Region,
    inner: Mutex<MemoryBankInner>,
}

impl MemoryBank {
    pub fn new(
        coil_region: Region,
        discrete_region: Region,
        holding_region: Region,
        input_region: Region,
    ) -> Self {
        Self {
            coil_region,
            discrete_region,
            holding_region,
            input_region,
            inner: Mutex::new(MemoryBankInner {
                coils: vec![false; coil_region.count as usize],
                discretes: vec![false; discrete_region.count as usize],
                holdings: vec![0; holding_region.count as usize],
                inputs: vec![0; input_region.count as usize],
            }),
        }
    }

    /// All four regions starting at logical address 1 with `count` elements
    pub fn uniform(count: u16) -> Self {
        let region = Region::new(1, count);
        Self::new(region, region, region, region)
    }

    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), RegisterError> {
        let off = self.coil_region.locate(address, 1)?;
        self.inner.lock().coils[off] = value;
        Ok(())
    }

    pub fn coil(&self, address: u16) -> Result<bool, RegisterError> {
        let off = self.coil_region.locate(address, 1)?;
        Ok(self.inner.lock().coils[off])
    }

    pub fn set_discrete(&self, address: u16, value: bool) -> Result<(), RegisterError> {
        let off = self.discrete_region.locate(address, 1)?;
        self.inner.lock().discretes[off] = value;
        Ok(())
    }

    pub fn discrete_input(&self, address: u16) -> Result<bool, RegisterError> {
        let off = self.discrete_region.locate(address, 1)?;
        Ok(self.inner.lock().discretes[off])
    }

    pub fn set_holding(&self, address: u16, value: u16) -> Result<(), RegisterError> {
        let off = self.holding_region.locate(address, 1)?;
        self.inner.lock().holdings[off] = value;
        Ok(())
    }

    pub fn holding(&self, address: u16) -> Result<u16, RegisterError> {
        let off = self.holding_region.locate(address, 1)?;
        Ok(self.inner.lock().holdings[off])
    }

    pub fn set_input(&self, address: u16, value: u16) -> Result<(), RegisterError> {
        let off = self.input_region.locate(address, 1)?;
        self.inner.lock().inputs[off] = value;
        Ok(())
    }

    pub fn input(&self, address: u16) -> Result<u16, RegisterError> {
        let off = self.input_region.locate(address, 1)?;
        Ok(self.inner.lock().inputs[off])
    }
}

fn copy_words_out(words: &[u16], buf: &mut [u8]) {
    for (i, word) in words.iter().enumerate() {
        write_u16(buf, 2 * i, *word);
    }
}

impl RegisterBank for MemoryBank {
    fn coils(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError> {
        let off = self.coil_region.locate(address, count)?;
        let mut inner = self.inner.lock();
        let slice = &mut inner.coils[off..off + count as usize];
        match mode {
            AccessMode::Read => pack_bits(slice, &mut buf[..bit_byte_count(count)]),
            AccessMode::Write => {
                slice.copy_from_slice(&unpack_bits(buf, count));
            }
        }
        Ok(())
    }

    fn discrete_inputs(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError> {
        let off = self.discrete_region.locate(address, count)?;
        let mut inner = self.inner.lock();
        let slice = &mut inner.discretes[off..off + count as usize];
        match mode {
            AccessMode::Read => pack_bits(slice, &mut buf[..bit_byte_count(count)]),
            AccessMode::Write => {
                slice.copy_from_slice(&unpack_bits(buf, count));
            }
        }
        Ok(())
    }

    fn holding_registers(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError> {
        let off = self.holding_region.locate(address, count)?;
        let mut inner = self.inner.lock();
        let slice = &mut inner.holdings[off..off + count as usize];
        match mode {
            AccessMode::Read => copy_words_out(slice, buf),
            AccessMode::Write => {
                for (i, word) in slice.iter_mut().enumerate() {
                    *word = read_u16(buf, 2 * i);
                }
            }
        }
        Ok(())
    }

    fn input_registers(
        &self,
        buf: &mut [u8],
        address: u16,
        count: u16,
        mode: AccessMode,
    ) -> Result<(), RegisterError> {
        let off = self.input_region.locate(address, count)?;
        let mut inner = self.inner.lock();
        let slice = &mut inner.inputs[off..off + count as usize];
        match mode {
            AccessMode::Read => copy_words_out(slice, buf),
            AccessMode::Write => {
                for (i, word) in slice.iter_mut().enumerate() {
                    *word = read_u16(buf, 2 * i);
                }
            }
        }
        Ok(())
    }
}
