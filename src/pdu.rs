//! Stack-allocated PDU buffer
//!
//! A PDU is a function code byte followed by a function-specific payload,
//! at most [`MAX_PDU_SIZE`] bytes. The buffer is a fixed-size stack array so
//! frame processing never allocates; ownership follows the frame: exactly one
//! FSM or engine holds a given send or receive PDU at a time.

use crate::constants::{EXCEPTION_FLAG, MAX_PDU_SIZE, PDU_DATA_OFF, PDU_FUNC_OFF};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};

/// Fixed-capacity PDU with stack-allocated storage
#[derive(Clone)]
pub struct Pdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl Pdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::Frame("PDU too large"));
        }
        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::Frame("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push a u16 in big-endian wire order
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    /// Extend with a byte slice
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::Frame("PDU would exceed max size"));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Discard the contents
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Truncate to `len` bytes. `len` must not exceed the current length.
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        debug_assert!(len <= self.len);
        self.len = self.len.min(len);
    }

    /// Grow the visible length to `len`, zero-filling is not performed; the
    /// backing array is always allocated. Used by handlers that write a
    /// response in place via [`as_full_mut`](Self::as_full_mut).
    #[inline]
    pub fn set_len(&mut self, len: usize) -> ModbusResult<()> {
        if len > MAX_PDU_SIZE {
            return Err(ModbusError::Frame("PDU length out of range"));
        }
        self.len = len;
        Ok(())
    }

    /// Immutable view of the valid bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Mutable view of the valid bytes
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Mutable view of the whole backing array, for in-place response
    /// encoding followed by [`set_len`](Self::set_len)
    #[inline]
    pub fn as_full_mut(&mut self) -> &mut [u8; MAX_PDU_SIZE] {
        &mut self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code byte, if any
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().get(PDU_FUNC_OFF).copied()
    }

    /// True if this PDU is an exception response (function code high bit set)
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Exception code byte of an exception response
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(PDU_DATA_OFF).copied()
        } else {
            None
        }
    }

    /// Replace the contents with an exception response for `function`
    pub fn make_exception(&mut self, function: u8, code: ExceptionCode) {
        self.len = 0;
        self.data[PDU_FUNC_OFF] = function | EXCEPTION_FLAG;
        self.data[PDU_DATA_OFF] = code as u8;
        self.len = 2;
    }
}

impl Default for Pdu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pdu[{}]({})", self.len, hex::encode(self.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_inspect() {
        let mut pdu = Pdu::new();
        assert!(pdu.is_empty());
        pdu.push(0x03).unwrap();
        pdu.push_u16(0x07D0).unwrap();
        pdu.push_u16(1).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x07, 0xD0, 0x00, 0x01]);
        assert_eq!(pdu.function_code(), Some(0x03));
        assert!(!pdu.is_exception());
    }

    #[test]
    fn size_limit_enforced() {
        let mut pdu = Pdu::new();
        pdu.extend(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(pdu.push(0).is_err());
        assert!(Pdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
    }

    #[test]
    fn exception_encoding() {
        let mut pdu = Pdu::from_slice(&[0x01, 0x00, 0x13, 0x00, 0x25]).unwrap();
        pdu.make_exception(0x01, ExceptionCode::IllegalDataAddress);
        assert_eq!(pdu.as_slice(), &[0x81, 0x02]);
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
    }
}
