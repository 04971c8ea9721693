//! Modbus requests and responses for the supported function codes
//!
//! | Code | Function | Request payload |
//! |------|----------|-----------------|
//! | 0x04 | Read Input Registers | address, quantity |
//! | 0x05 | Write Single Coil | address, 0xFF00 / 0x0000 |
//! | 0x06 | Write Single Register | address, value |
//! | 0x0F | Write Multiple Coils | address, quantity, byte count, packed bits |
//!
//! Requests are validated when built, so nothing malformed reaches the wire.

use std::fmt;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// Modbus slave/unit identifier (1-247)
pub type SlaveId = u8;

/// Supported Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
}

impl ModbusFunction {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            FC_READ_INPUT_REGISTERS => Some(ModbusFunction::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Some(ModbusFunction::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Some(ModbusFunction::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Some(ModbusFunction::WriteMultipleCoils),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ModbusFunction::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            ModbusFunction::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
            ModbusFunction::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            ModbusFunction::WriteMultipleCoils => FC_WRITE_MULTIPLE_COILS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, ModbusFunction::ReadInputRegisters)
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.to_u8())
    }
}

/// Convert a wider integer into a register value, rejecting anything outside 0..=65535.
///
/// ```rust
/// use voltage_rtu::protocol::to_register_value;
///
/// assert_eq!(to_register_value(50i64).unwrap(), 50);
/// assert!(to_register_value(70_000u32).is_err());
/// assert!(to_register_value(-1i32).is_err());
/// ```
pub fn to_register_value<V>(value: V) -> ModbusResult<u16>
where
    V: TryInto<u16> + Copy + fmt::Display,
{
    value.try_into().map_err(|_| {
        ModbusError::invalid_argument(format!(
            "register value {} does not fit in 16 bits",
            value
        ))
    })
}

fn validate_slave_id(slave_id: SlaveId) -> ModbusResult<()> {
    if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&slave_id) {
        return Err(ModbusError::invalid_argument(format!(
            "slave id {} out of range {}-{}",
            slave_id, MIN_SLAVE_ID, MAX_SLAVE_ID
        )));
    }
    Ok(())
}

fn validate_span(address: u16, quantity: u16) -> ModbusResult<()> {
    if u32::from(address) + u32::from(quantity) > 0x1_0000 {
        return Err(ModbusError::invalid_argument(format!(
            "address range {}+{} exceeds 65535",
            address, quantity
        )));
    }
    Ok(())
}

/// Pack coil states LSB-first, eight per byte
fn pack_coils(values: &[bool]) -> Vec<u8> {
    values
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &on)| if on { byte | (1 << i) } else { byte })
        })
        .collect()
}

/// A validated Modbus request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: u16,
    pub quantity: u16,
    /// Function-specific data: coil/register value for FC05/06, packed bits for FC15
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// FC04: read `count` input registers starting at `address`
    pub fn read_input_registers(
        slave_id: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<Self> {
        let request = Self {
            slave_id,
            function: ModbusFunction::ReadInputRegisters,
            address,
            quantity: count,
            data: Vec::new(),
        };
        request.validate()?;
        Ok(request)
    }

    /// FC05: switch one coil on or off
    pub fn write_single_coil(slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<Self> {
        let coil = if value { COIL_ON } else { COIL_OFF };
        let request = Self {
            slave_id,
            function: ModbusFunction::WriteSingleCoil,
            address,
            quantity: 1,
            data: coil.to_be_bytes().to_vec(),
        };
        request.validate()?;
        Ok(request)
    }

    /// FC06: write one holding register
    pub fn write_single_register(
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> ModbusResult<Self> {
        let request = Self {
            slave_id,
            function: ModbusFunction::WriteSingleRegister,
            address,
            quantity: 1,
            data: value.to_be_bytes().to_vec(),
        };
        request.validate()?;
        Ok(request)
    }

    /// FC15: write a run of coils starting at `address`
    pub fn write_multiple_coils(
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<Self> {
        if values.is_empty() || values.len() > MAX_WRITE_COILS as usize {
            return Err(ModbusError::invalid_argument(format!(
                "coil count {} out of range 1-{}",
                values.len(),
                MAX_WRITE_COILS
            )));
        }

        let request = Self {
            slave_id,
            function: ModbusFunction::WriteMultipleCoils,
            address,
            quantity: values.len() as u16,
            data: pack_coils(values),
        };
        request.validate()?;
        Ok(request)
    }

    /// Check every field against the function's limits.
    pub fn validate(&self) -> ModbusResult<()> {
        validate_slave_id(self.slave_id)?;

        match self.function {
            ModbusFunction::ReadInputRegisters => {
                if self.quantity == 0 || self.quantity > MAX_READ_REGISTERS {
                    return Err(ModbusError::invalid_argument(format!(
                        "register count {} out of range 1-{}",
                        self.quantity, MAX_READ_REGISTERS
                    )));
                }
                validate_span(self.address, self.quantity)
            }
            ModbusFunction::WriteSingleCoil => match self.data.as_slice() {
                [0xFF, 0x00] | [0x00, 0x00] => Ok(()),
                other => Err(ModbusError::invalid_argument(format!(
                    "coil value must be 0xFF00 or 0x0000, got {:02X?}",
                    other
                ))),
            },
            ModbusFunction::WriteSingleRegister => {
                if self.data.len() != 2 {
                    return Err(ModbusError::invalid_argument(
                        "register value must be exactly 2 bytes",
                    ));
                }
                Ok(())
            }
            ModbusFunction::WriteMultipleCoils => {
                if self.quantity == 0 || self.quantity > MAX_WRITE_COILS {
                    return Err(ModbusError::invalid_argument(format!(
                        "coil count {} out of range 1-{}",
                        self.quantity, MAX_WRITE_COILS
                    )));
                }
                if self.data.len() != usize::from(self.quantity).div_ceil(8) {
                    return Err(ModbusError::invalid_argument(
                        "packed coil data does not match quantity",
                    ));
                }
                validate_span(self.address, self.quantity)
            }
        }
    }

    /// Request payload: everything between the function code and the CRC
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(5 + self.data.len());
        payload.extend_from_slice(&self.address.to_be_bytes());

        match self.function {
            ModbusFunction::ReadInputRegisters => {
                payload.extend_from_slice(&self.quantity.to_be_bytes());
            }
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                payload.extend_from_slice(&self.data);
            }
            ModbusFunction::WriteMultipleCoils => {
                payload.extend_from_slice(&self.quantity.to_be_bytes());
                payload.push(self.data.len() as u8);
                payload.extend_from_slice(&self.data);
            }
        }

        payload
    }
}

/// A normal (non-exception) response matched to its request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    /// Response payload without slave id, function code and CRC
    pub data: Vec<u8>,
}

impl ModbusResponse {
    pub fn new(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
        }
    }

    /// Decode an FC04 payload: `[byte count][hi lo]...`
    pub fn parse_registers(&self, expected_count: u16) -> ModbusResult<Vec<u16>> {
        let Some((&byte_count, values)) = self.data.split_first() else {
            return Err(ModbusError::unexpected_response("empty register response"));
        };

        let expected_bytes = usize::from(expected_count) * 2;
        if usize::from(byte_count) != expected_bytes || values.len() != expected_bytes {
            return Err(ModbusError::unexpected_response(format!(
                "expected {} register bytes, byte count {} with {} bytes present",
                expected_bytes,
                byte_count,
                values.len()
            )));
        }

        Ok(values
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Write responses echo the request; anything else means the reply is not ours.
    pub fn verify_echo(&self, request: &ModbusRequest) -> ModbusResult<()> {
        let expected = match request.function {
            ModbusFunction::ReadInputRegisters => return Ok(()),
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                request.payload()
            }
            ModbusFunction::WriteMultipleCoils => {
                let mut echo = request.address.to_be_bytes().to_vec();
                echo.extend_from_slice(&request.quantity.to_be_bytes());
                echo
            }
        };

        if self.data != expected {
            return Err(ModbusError::unexpected_response(format!(
                "{} echo mismatch: sent {:02X?}, got {:02X?}",
                request.function.name(),
                expected,
                self.data
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_mapping() {
        for code in [0x04, 0x05, 0x06, 0x0F] {
            let function = ModbusFunction::from_u8(code).unwrap();
            assert_eq!(function.to_u8(), code);
        }
        assert_eq!(ModbusFunction::from_u8(0x03), None);
        assert!(!ModbusFunction::ReadInputRegisters.is_write());
        assert!(ModbusFunction::WriteMultipleCoils.is_write());
    }

    #[test]
    fn test_read_input_registers_payload() {
        let request = ModbusRequest::read_input_registers(1, 999, 1).unwrap();
        assert_eq!(request.payload(), vec![0x03, 0xE7, 0x00, 0x01]);
    }

    #[test]
    fn test_write_single_coil_payload() {
        let on = ModbusRequest::write_single_coil(1, 999, true).unwrap();
        assert_eq!(on.payload(), vec![0x03, 0xE7, 0xFF, 0x00]);

        let off = ModbusRequest::write_single_coil(1, 999, false).unwrap();
        assert_eq!(off.payload(), vec![0x03, 0xE7, 0x00, 0x00]);
    }

    #[test]
    fn test_write_single_register_payload() {
        let request = ModbusRequest::write_single_register(1, 999, 50).unwrap();
        assert_eq!(request.payload(), vec![0x03, 0xE7, 0x00, 0x32]);
    }

    #[test]
    fn test_write_multiple_coils_payload() {
        let request = ModbusRequest::write_multiple_coils(1, 0x0013, &[true, false, true]).unwrap();
        assert_eq!(
            request.payload(),
            vec![0x00, 0x13, 0x00, 0x03, 0x01, 0b0000_0101]
        );

        let single = ModbusRequest::write_multiple_coils(1, 1000, &[true]).unwrap();
        assert_eq!(single.payload(), vec![0x03, 0xE8, 0x00, 0x01, 0x01, 0x01]);
    }

    #[test]
    fn test_coil_packing_spans_bytes() {
        let values = [true, true, false, false, true, false, true, true, false, true];
        assert_eq!(pack_coils(&values), vec![0b1101_0011, 0b0000_0010]);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        assert!(matches!(
            ModbusRequest::read_input_registers(0, 0, 1),
            Err(ModbusError::InvalidArgument { .. })
        ));
        assert!(ModbusRequest::read_input_registers(248, 0, 1).is_err());
        assert!(ModbusRequest::read_input_registers(1, 0, 0).is_err());
        assert!(ModbusRequest::read_input_registers(1, 0, 126).is_err());
        assert!(ModbusRequest::read_input_registers(1, 65535, 2).is_err());
        assert!(ModbusRequest::read_input_registers(1, 65535, 1).is_ok());
        assert!(ModbusRequest::write_multiple_coils(1, 0, &[]).is_err());
        assert!(ModbusRequest::write_multiple_coils(1, 0, &vec![true; 1969]).is_err());
        assert!(ModbusRequest::write_single_coil(250, 0, true).is_err());
    }

    #[test]
    fn test_validate_catches_hand_built_requests() {
        let request = ModbusRequest {
            slave_id: 1,
            function: ModbusFunction::WriteSingleCoil,
            address: 0,
            quantity: 1,
            data: vec![0x12, 0x34],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_to_register_value() {
        assert_eq!(to_register_value(65535u32).unwrap(), 65535);
        assert!(matches!(
            to_register_value(65536u32),
            Err(ModbusError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_parse_registers() {
        let response = ModbusResponse::new(
            1,
            ModbusFunction::ReadInputRegisters,
            vec![0x04, 0x00, 0x32, 0x12, 0x34],
        );
        assert_eq!(response.parse_registers(2).unwrap(), vec![0x0032, 0x1234]);
        assert!(matches!(
            response.parse_registers(1),
            Err(ModbusError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_parse_registers_truncated() {
        let response =
            ModbusResponse::new(1, ModbusFunction::ReadInputRegisters, vec![0x02, 0x00]);
        assert!(response.parse_registers(1).is_err());

        let empty = ModbusResponse::new(1, ModbusFunction::ReadInputRegisters, vec![]);
        assert!(empty.parse_registers(1).is_err());
    }

    #[test]
    fn test_verify_echo() {
        let request = ModbusRequest::write_single_register(1, 999, 50).unwrap();
        let good = ModbusResponse::new(1, request.function, request.payload());
        assert!(good.verify_echo(&request).is_ok());

        let bad = ModbusResponse::new(1, request.function, vec![0x03, 0xE7, 0x00, 0x33]);
        assert!(matches!(
            bad.verify_echo(&request),
            Err(ModbusError::UnexpectedResponse { .. })
        ));

        let coils = ModbusRequest::write_multiple_coils(1, 1000, &[true]).unwrap();
        let echo = ModbusResponse::new(1, coils.function, vec![0x03, 0xE8, 0x00, 0x01]);
        assert!(echo.verify_echo(&coils).is_ok());
    }
}
