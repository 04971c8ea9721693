//! Modbus RTU protocol constants based on the official specification
//!
//! - Maximum RTU ADU: 256 bytes (slave address + PDU + CRC)
//! - Maximum PDU: 253 bytes
//! - Register/coil limits are calculated to fit within the PDU size constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum RTU frame (ADU) size on a serial line
/// Slave Address (1) + PDU (253) + CRC (2) = 256 bytes
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Smallest frame that can carry a CRC: Slave Address (1) + Function (1) + CRC (2)
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// Exception frame: Slave Address (1) + Function|0x80 (1) + Exception Code (1) + CRC (2)
pub const EXCEPTION_FRAME_SIZE: usize = 5;

/// Number of CRC bytes terminating every RTU frame
pub const CRC_SIZE: usize = 2;

// ============================================================================
// Addressing
// ============================================================================

/// Lowest addressable slave id (0 is broadcast, unsupported by the master)
pub const MIN_SLAVE_ID: u8 = 1;

/// Highest addressable slave id
pub const MAX_SLAVE_ID: u8 = 247;

// ============================================================================
// Quantity Limits
// ============================================================================

/// Maximum number of registers for FC04 (Read Input Registers)
///
/// Response PDU: 1 (FC) + 1 (byte count) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of coils for FC15 (Write Multiple Coils)
///
/// Request PDU: 1 + 2 + 2 + 1 + ceil(N / 8) ≤ 253 → N ≤ 1976, Modbus defines 1968 (0x7B0)
pub const MAX_WRITE_COILS: u16 = 1968;

/// FC05 ON value
pub const COIL_ON: u16 = 0xFF00;

/// FC05 OFF value
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Slave Device Failure
pub const EXCEPTION_SLAVE_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Slave Device Busy
pub const EXCEPTION_SLAVE_DEVICE_BUSY: u8 = 0x06;

/// Negative Acknowledge
pub const EXCEPTION_NEGATIVE_ACKNOWLEDGE: u8 = 0x07;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Timing
// ============================================================================

/// Above this baud rate the fixed silence floors apply instead of character times
pub const FIXED_TIMING_BAUD_THRESHOLD: u32 = 19_200;

/// Fixed inter-frame silence (t3.5) for baud rates above 19200
pub const MIN_INTER_FRAME_SILENCE_US: u64 = 1_750;

/// Fixed inter-character timeout (t1.5) for baud rates above 19200
pub const MIN_INTER_CHAR_TIMEOUT_US: u64 = 750;

/// Default response timeout per attempt
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1_500;

/// Default number of resends after the first attempt
pub const DEFAULT_MAX_RETRIES: u8 = 2;

/// Default line speed
pub const DEFAULT_BAUD_RATE: u32 = 9_600;
