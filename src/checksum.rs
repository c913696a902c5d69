//! Frame checksums for the serial transports
//!
//! RTU frames carry a CRC-16 (polynomial 0xA001, initial value 0xFFFF),
//! appended low byte first. A received frame is valid iff the CRC computed
//! over the whole frame, trailer included, equals zero.
//!
//! ASCII frames carry an LRC: the two's complement of the byte sum over the
//! binary frame (address + PDU), appended before the CR LF trailer.

/// Compute the Modbus RTU CRC-16 over a byte buffer
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= *byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC-16 in wire byte order: low byte first
pub fn crc16_bytes(data: &[u8]) -> [u8; 2] {
    let crc = crc16(data);
    [(crc & 0xFF) as u8, (crc >> 8) as u8]
}

/// A frame (trailer included) is valid iff the residual CRC is zero
pub fn crc16_valid(frame: &[u8]) -> bool {
    crc16(frame) == 0
}

/// Compute the Modbus ASCII LRC over the binary frame bytes
pub fn lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

/// A binary ASCII frame (LRC included) is valid iff the byte sum is zero
pub fn lrc_valid(frame: &[u8]) -> bool {
    frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn crc16_known_vector() {
        // Read holding registers request: slave 1, address 0, count 2
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(crc16(&data), 0x0BC4);
        assert_eq!(crc16_bytes(&data), [0xC4, 0x0B]);
    }

    #[test]
    fn crc16_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let len = rng.gen_range(1..=64);
            let mut frame: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let trailer = crc16_bytes(&frame);
            frame.extend_from_slice(&trailer);
            assert!(crc16_valid(&frame));
        }
    }

    #[test]
    fn crc16_detects_single_bit_errors() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let len = rng.gen_range(4..=32);
            let mut frame: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let trailer = crc16_bytes(&frame);
            frame.extend_from_slice(&trailer);

            let byte = rng.gen_range(0..frame.len());
            let bit = rng.gen_range(0..8);
            frame[byte] ^= 1 << bit;
            assert!(!crc16_valid(&frame));
        }
    }

    #[test]
    fn lrc_known_vector() {
        // :110503006AFF00... sample from the serial line specification
        let data = [0x11, 0x05, 0x03, 0x00, 0x6A, 0xFF, 0x00];
        let check = lrc(&data);
        let mut frame = data.to_vec();
        frame.push(check);
        assert!(lrc_valid(&frame));
        assert_eq!(
            check,
            (0x11u8
                .wrapping_add(0x05)
                .wrapping_add(0x03)
                .wrapping_add(0x6A)
                .wrapping_add(0xFF))
            .wrapping_neg()
        );
    }

    #[test]
    fn lrc_rejects_tampered_frame() {
        let data = [0x0A, 0x01, 0x00, 0x13, 0x00, 0x25];
        let mut frame = data.to_vec();
        frame.push(lrc(&data));
        assert!(lrc_valid(&frame));
        frame[2] ^= 0x40;
        assert!(!lrc_valid(&frame));
    }
}
