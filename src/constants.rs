//! Modbus protocol constants based on the official specification
//!
//! Sizes are derived from the RS485 serial line limit: a serial ADU is at
//! most 256 bytes, which after the address byte and the CRC leaves 253 bytes
//! for the PDU. The TCP MBAP framing reuses the same PDU limit.

// ============================================================================
// Frame size constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
///
/// RS485 ADU (256 bytes) - slave address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Minimum PDU size: the function code alone
pub const MIN_PDU_SIZE: usize = 1;

/// Maximum serial ADU size: address + PDU + CRC
pub const MAX_SER_ADU_SIZE: usize = 256;

/// Minimum serial ADU size: address + function code + CRC
pub const MIN_SER_ADU_SIZE: usize = 4;

/// Offset of the slave address inside a serial ADU
pub const SER_ADU_ADDR_OFF: usize = 0;

/// Offset of the PDU inside a serial ADU
pub const SER_ADU_PDU_OFF: usize = 1;

/// Size of the CRC trailer of a serial ADU
pub const SER_ADU_CRC_SIZE: usize = 2;

/// MBAP header length for TCP: transaction id(2) + protocol id(2) + length(2)
/// + unit id(1)
pub const MBAP_HEADER_SIZE: usize = 7;

/// The reserved protocol identifier carried by every Modbus TCP frame
pub const MBAP_PROTOCOL_ID: u16 = 0;

/// Maximum value of the MBAP length field: unit id + maximum PDU
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Maximum TCP ADU size: MBAP header + PDU
pub const MAX_TCP_ADU_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;

// ============================================================================
// Addressing
// ============================================================================

/// Broadcast address: a master request to address 0 is executed by every
/// slave and answered by none
pub const BROADCAST_ADDRESS: u8 = 0;

/// Lowest valid individual slave address
pub const MIN_SLAVE_ADDRESS: u8 = 1;

/// Highest valid individual slave address
pub const MAX_SLAVE_ADDRESS: u8 = 247;

/// Pseudo slave address used for TCP frames. TCP has no slave address on the
/// wire, so transports report this sentinel to keep the dispatch path shared
/// with the serial transports.
pub const TCP_PSEUDO_ADDRESS: u8 = 0xFF;

// ============================================================================
// PDU layout
// ============================================================================

/// Offset of the function code inside a PDU
pub const PDU_FUNC_OFF: usize = 0;

/// Offset of the first data byte inside a PDU
pub const PDU_DATA_OFF: usize = 1;

/// Function code bit set on exception responses
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Function codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Report Slave ID (FC17)
pub const FC_REPORT_SLAVE_ID: u8 = 0x11;

/// Read/Write Multiple Registers (FC23)
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

// ============================================================================
// Operation count limits
// ============================================================================

/// Maximum number of coils for FC01/FC02
///
/// Response PDU: fc(1) + byte count(1) + ceil(N/8) data bytes <= 253, the
/// specification rounds the bound down to 2000 (0x7D0).
pub const MAX_READ_BITS: u16 = 0x07D0;

/// Maximum number of registers for FC03/FC04
///
/// Response PDU: fc(1) + byte count(1) + 2N data bytes <= 253 => N <= 125.
pub const MAX_READ_REGISTERS: u16 = 0x007D;

/// Maximum number of coils for FC15 (0x7B0 per specification)
pub const MAX_WRITE_BITS: u16 = 0x07B0;

/// Maximum number of registers for FC16
///
/// Request PDU: fc(1) + addr(2) + count(2) + byte count(1) + 2N <= 253
/// => N <= 123 (0x78).
pub const MAX_WRITE_REGISTERS: u16 = 0x0078;

/// Maximum register read count for FC23 (same response shape as FC03)
pub const MAX_READWRITE_READ_REGISTERS: u16 = 0x007D;

/// Maximum register write count for FC23
///
/// Request PDU: fc(1) + 2x addr(2) + 2x count(2) + byte count(1) + 2N <= 253
/// => N <= 121 (0x79 per specification).
pub const MAX_READWRITE_WRITE_REGISTERS: u16 = 0x0079;

// ============================================================================
// Serial timing
// ============================================================================

/// Baud rate above which the RTU inter-frame delay is fixed at 1750 us
/// instead of being derived from the character time
pub const RTU_FIXED_T35_BAUD: u32 = 19_200;

/// Fixed t3.5 for fast baud rates, in microseconds
pub const RTU_FIXED_T35_US: u64 = 1_750;

/// Bits per serial character on a Modbus line: start + 8 data + parity/stop
/// + stop = 11
pub const SERIAL_BITS_PER_CHAR: u64 = 11;

/// Inter-character guard timeout for the ASCII transport. ASCII frames are
/// delimited by explicit characters, the timer only aborts a stalled frame.
pub const ASCII_INTER_CHAR_TIMEOUT_MS: u64 = 1_000;

/// ASCII frame start delimiter
pub const ASCII_START: u8 = b':';

/// ASCII frame end delimiter, first byte
pub const ASCII_CR: u8 = b'\r';

/// ASCII frame end delimiter, second byte
pub const ASCII_LF: u8 = b'\n';
