//! RTU frame codec
//!
//! ```text
//! [slave id 1B][function 1B][payload N B][CRC16 lo][CRC16 hi]
//! ```
//!
//! The CRC is CRC-16/MODBUS (reflected polynomial 0xA001, init 0xFFFF),
//! transmitted little-endian. Everything here is pure: no I/O, no state.

use crc::{Crc, CRC_16_MODBUS};

use crate::constants::{
    CRC_SIZE, EXCEPTION_FLAG, EXCEPTION_FRAME_SIZE, MIN_RTU_FRAME_SIZE,
};
use crate::error::FrameError;

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the Modbus CRC16 of `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// A frame that passed length and CRC validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    pub unit_id: u8,
    pub function_code: u8,
    pub payload: Vec<u8>,
}

impl RtuFrame {
    /// Function code with the high bit set
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }

    /// Function code without the exception flag
    #[inline]
    pub fn base_function(&self) -> u8 {
        self.function_code & !EXCEPTION_FLAG
    }

    /// The single exception byte of an exception response
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.payload.first().copied()
        } else {
            None
        }
    }
}

/// Build a CRC-terminated frame
pub fn encode(unit_id: u8, function_code: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len() + CRC_SIZE);
    frame.push(unit_id);
    frame.push(function_code);
    frame.extend_from_slice(payload);

    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Validate and split a received frame
pub fn decode(data: &[u8]) -> Result<RtuFrame, FrameError> {
    if data.len() < MIN_RTU_FRAME_SIZE {
        return Err(FrameError::TooShort { len: data.len() });
    }

    let crc_offset = data.len() - CRC_SIZE;
    let actual = u16::from_le_bytes([data[crc_offset], data[crc_offset + 1]]);
    let expected = crc16(&data[..crc_offset]);
    if actual != expected {
        return Err(FrameError::CrcMismatch { expected, actual });
    }

    let function_code = data[1];
    if function_code & EXCEPTION_FLAG != 0 && data.len() < EXCEPTION_FRAME_SIZE {
        return Err(FrameError::TooShort { len: data.len() });
    }

    Ok(RtuFrame {
        unit_id: data[0],
        function_code,
        payload: data[2..crc_offset].to_vec(),
    })
}

/// Format raw bytes as hex string for packet logging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
