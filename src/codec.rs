//! Wire data helpers: big-endian register words and bit-packed coil data
//!
//! Coils and discrete inputs travel one bit per element, least significant
//! bit first within each byte. When the element count is not a multiple of
//! eight the final byte is zero-padded in its unused high bits; the byte
//! count on the wire must equal `ceil(count / 8)`.

/// Number of data bytes used by `count` bit-packed elements
#[inline]
pub fn bit_byte_count(count: u16) -> usize {
    (count as usize).div_ceil(8)
}

/// Read a big-endian u16 at `offset`
#[inline]
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Write a big-endian u16 at `offset`
#[inline]
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Pack `bits` into `out`, LSB-first per byte, zero-padding the tail.
/// `out` must hold at least `bit_byte_count(bits.len())` bytes.
pub fn pack_bits(bits: &[bool], out: &mut [u8]) {
    let nbytes = (bits.len()).div_ceil(8);
    for byte in &mut out[..nbytes] {
        *byte = 0;
    }
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            out[i / 8] |= 1 << (i % 8);
        }
    }
}

/// Unpack `count` bits from `data`, LSB-first per byte
pub fn unpack_bits(data: &[u8], count: u16) -> Vec<bool> {
    (0..count as usize)
        .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}
