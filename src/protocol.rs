//! Modbus protocol definitions and message handling
//!
//! Function codes, request/response structures and PDU encoding shared by
//! the TCP and RTU transports. A PDU is identical on both transports; only
//! its envelope differs (MBAP header vs. slave id + CRC).

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// Modbus slave/unit identifier
pub type SlaveId = u8;

/// Function codes used by the register pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            FC_READ_COILS => Ok(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Ok(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Ok(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }

    /// FC01/FC02 return packed bits.
    pub fn is_bit_function(self) -> bool {
        matches!(
            self,
            Self::ReadCoils | Self::ReadDiscreteInputs | Self::WriteMultipleCoils
        )
    }

    /// Largest quantity a single request may carry.
    pub fn max_quantity(self) -> u16 {
        match self {
            Self::ReadCoils | Self::ReadDiscreteInputs => MAX_READ_COILS,
            Self::ReadHoldingRegisters | Self::ReadInputRegisters => MAX_READ_REGISTERS,
            Self::WriteSingleCoil | Self::WriteSingleRegister => 1,
            Self::WriteMultipleCoils => MAX_WRITE_COILS,
            Self::WriteMultipleRegisters => MAX_WRITE_REGISTERS,
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, self.to_u8())
    }
}

/// A request before transport framing.
///
/// `data` carries only the payload values: the 2-byte value for FC05/FC06,
/// or the packed coils / big-endian registers for FC0F/FC10. Address,
/// quantity and byte count are added by [`encode_pdu`](Self::encode_pdu).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: u16,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    pub fn new_read(slave_id: SlaveId, function: ModbusFunction, address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Check quantity and payload against the function's limits.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.quantity == 0 || self.quantity > self.function.max_quantity() {
            return Err(ModbusError::invalid_data(format!(
                "Invalid quantity {} for {}",
                self.quantity, self.function
            )));
        }

        if u32::from(self.address) + u32::from(self.quantity) > 0x1_0000 {
            return Err(ModbusError::invalid_data(format!(
                "Request at {} with quantity {} exceeds the address space",
                self.address, self.quantity
            )));
        }

        let expected_data = match self.function {
            f if f.is_read_function() => 0,
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 2,
            ModbusFunction::WriteMultipleCoils => usize::from(self.quantity).div_ceil(8),
            _ => usize::from(self.quantity) * 2,
        };
        if self.data.len() != expected_data {
            return Err(ModbusError::invalid_data(format!(
                "{} expects {} data bytes, got {}",
                self.function,
                expected_data,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Encode the PDU (function code onwards).
    pub fn encode_pdu(&self) -> ModbusResult<BytesMut> {
        self.validate()?;

        let mut pdu = BytesMut::with_capacity(6 + self.data.len());
        pdu.put_u8(self.function.to_u8());
        pdu.put_u16(self.address);

        match self.function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                pdu.put_slice(&self.data);
            }
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                pdu.put_u16(self.quantity);
                pdu.put_u8(self.data.len() as u8);
                pdu.put_slice(&self.data);
            }
            _ => pdu.put_u16(self.quantity),
        }

        if pdu.len() > MAX_PDU_SIZE {
            return Err(ModbusError::invalid_data(format!(
                "PDU too large: {} bytes (max {})",
                pdu.len(),
                MAX_PDU_SIZE
            )));
        }
        Ok(pdu)
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    data: Vec<u8>,
    exception: Option<u8>,
}

impl ModbusResponse {
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
            exception: None,
        }
    }

    pub fn new_exception(slave_id: SlaveId, function: ModbusFunction, code: u8) -> Self {
        Self {
            slave_id,
            function,
            data: Vec::new(),
            exception: Some(code),
        }
    }

    /// Decode a response PDU received from `slave_id`.
    pub fn from_pdu(slave_id: SlaveId, pdu: &[u8]) -> ModbusResult<Self> {
        let Some((&fc, payload)) = pdu.split_first() else {
            return Err(ModbusError::protocol("Empty response PDU"));
        };

        if fc & EXCEPTION_FLAG != 0 {
            let code = payload
                .first()
                .copied()
                .ok_or_else(|| ModbusError::protocol("Exception response without code"))?;
            let function = ModbusFunction::from_u8(fc & !EXCEPTION_FLAG)?;
            return Ok(Self::new_exception(slave_id, function, code));
        }

        let function = ModbusFunction::from_u8(fc)?;
        Ok(Self::new_success(slave_id, function, payload.to_vec()))
    }

    /// Payload after the function code.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    pub fn exception_code(&self) -> Option<u8> {
        self.exception
    }

    /// The exception as an error, if this is an exception response.
    pub fn get_exception(&self) -> Option<ModbusError> {
        self.exception
            .map(|code| ModbusError::exception(self.function.to_u8(), code))
    }

    /// Check that this response answers `request`.
    pub fn check_matches(&self, request: &ModbusRequest) -> ModbusResult<()> {
        if self.slave_id != request.slave_id {
            return Err(ModbusError::protocol(format!(
                "Response slave ID mismatch: expected {}, got {}",
                request.slave_id, self.slave_id
            )));
        }
        if self.function != request.function {
            return Err(ModbusError::protocol(format!(
                "Response function mismatch: expected {}, got {}",
                request.function, self.function
            )));
        }
        Ok(())
    }

    /// Check that a write response echoes its request.
    ///
    /// FC05/FC06 echo address and value, FC0F/FC10 address and quantity.
    pub fn check_write_echo(&self, request: &ModbusRequest) -> ModbusResult<()> {
        if let Some(err) = self.get_exception() {
            return Err(err);
        }
        let tail = match request.function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                match request.data.as_slice() {
                    [hi, lo] => [*hi, *lo],
                    _ => return Err(ModbusError::invalid_data("Single write needs a 2-byte value")),
                }
            }
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                request.quantity.to_be_bytes()
            }
            _ => return Ok(()),
        };
        let [a_hi, a_lo] = request.address.to_be_bytes();
        let expected = [a_hi, a_lo, tail[0], tail[1]];

        if self.data.as_slice() != &expected[..] {
            return Err(ModbusError::protocol(format!(
                "{} response echoes [{}], expected [{}]",
                request.function,
                format_hex(&self.data),
                format_hex(&expected)
            )));
        }
        Ok(())
    }

    /// Byte-count-prefixed payload of a read response.
    fn counted_payload(&self) -> ModbusResult<&[u8]> {
        if let Some(err) = self.get_exception() {
            return Err(err);
        }
        let (&byte_count, rest) = self
            .data
            .split_first()
            .ok_or_else(|| ModbusError::protocol("Empty response data"))?;
        let byte_count = usize::from(byte_count);
        if rest.len() < byte_count {
            return Err(ModbusError::protocol(format!(
                "Byte count {} exceeds payload of {} bytes",
                byte_count,
                rest.len()
            )));
        }
        Ok(&rest[..byte_count])
    }

    /// Register values of an FC03/FC04 response.
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        let payload = self.counted_payload()?;
        if payload.len() % 2 != 0 {
            return Err(ModbusError::protocol("Odd register data length"));
        }
        Ok(payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Bit values of an FC01/FC02 response, LSB first, padded to whole bytes.
    pub fn parse_bits(&self) -> ModbusResult<Vec<bool>> {
        let payload = self.counted_payload()?;
        Ok(unpack_bits(payload, payload.len() * 8))
    }
}

/// Pack booleans LSB-first into bytes.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` LSB-first bits.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| {
            bytes
                .get(i / 8)
                .map(|b| b & (1 << (i % 8)) != 0)
                .unwrap_or(false)
        })
        .collect()
}

/// Total response PDU length implied by the bytes received so far, if known.
///
/// Used by the RTU transport, which has no length field.
pub fn expected_response_pdu_len(pdu_prefix: &[u8]) -> Option<usize> {
    let fc = *pdu_prefix.first()?;
    if fc & EXCEPTION_FLAG != 0 {
        return Some(2);
    }
    match fc {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS => pdu_prefix.get(1).map(|&n| 2 + usize::from(n)),
        FC_WRITE_SINGLE_COIL
        | FC_WRITE_SINGLE_REGISTER
        | FC_WRITE_MULTIPLE_COILS
        | FC_WRITE_MULTIPLE_REGISTERS => Some(5),
        _ => None,
    }
}

/// Format raw bytes as space-separated hex for packet logs.
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(
            ModbusFunction::from_u8(0x03).unwrap(),
            ModbusFunction::ReadHoldingRegisters
        );
        assert_eq!(ModbusFunction::WriteMultipleCoils.to_u8(), 0x0F);
        assert_eq!(
            ModbusFunction::from_u8(0x2B),
            Err(ModbusError::invalid_function(0x2B))
        );
        assert_eq!(
            ModbusFunction::ReadInputRegisters.to_string(),
            "Read Input Registers (0x04)"
        );
    }

    #[test]
    fn test_encode_read_pdu() {
        let req = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 10, 4);
        assert_eq!(&req.encode_pdu().unwrap()[..], &[0x03, 0x00, 0x0A, 0x00, 0x04]);
    }

    #[test]
    fn test_encode_write_multiple_registers_pdu() {
        let req = ModbusRequest {
            slave_id: 1,
            function: ModbusFunction::WriteMultipleRegisters,
            address: 10,
            quantity: 2,
            data: vec![0x86, 0xA0, 0x00, 0x01],
        };
        assert_eq!(
            &req.encode_pdu().unwrap()[..],
            &[0x10, 0x00, 0x0A, 0x00, 0x02, 0x04, 0x86, 0xA0, 0x00, 0x01]
        );
    }

    #[test]
    fn test_encode_single_coil_pdu() {
        let req = ModbusRequest {
            slave_id: 1,
            function: ModbusFunction::WriteSingleCoil,
            address: 11,
            quantity: 1,
            data: vec![0xFF, 0x00],
        };
        assert_eq!(&req.encode_pdu().unwrap()[..], &[0x05, 0x00, 0x0B, 0xFF, 0x00]);
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let too_many = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 126);
        assert!(too_many.validate().is_err());

        let zero = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 0);
        assert!(zero.validate().is_err());

        let past_end = ModbusRequest::new_read(1, ModbusFunction::ReadInputRegisters, 0xFFFF, 2);
        assert!(past_end.validate().is_err());

        let short_payload = ModbusRequest {
            slave_id: 1,
            function: ModbusFunction::WriteMultipleRegisters,
            address: 0,
            quantity: 2,
            data: vec![0, 1],
        };
        assert!(short_payload.validate().is_err());
    }

    #[test]
    fn test_response_parsing() {
        let response = ModbusResponse::from_pdu(1, &[0x03, 0x04, 0x12, 0x34, 0x56, 0x78]).unwrap();
        assert_eq!(response.parse_registers().unwrap(), vec![0x1234, 0x5678]);

        let response = ModbusResponse::from_pdu(1, &[0x01, 0x01, 0b0000_0101]).unwrap();
        let bits = response.parse_bits().unwrap();
        assert_eq!(bits.len(), 8);
        assert!(bits[0] && !bits[1] && bits[2]);
    }

    #[test]
    fn test_exception_response() {
        let response = ModbusResponse::from_pdu(1, &[0x83, 0x02]).unwrap();
        assert!(response.is_exception());
        assert_eq!(response.exception_code(), Some(0x02));
        assert_eq!(response.parse_registers(), Err(ModbusError::exception(0x03, 0x02)));
    }

    #[test]
    fn test_byte_count_overrun() {
        let response = ModbusResponse::from_pdu(1, &[0x03, 0x04, 0x12, 0x34]).unwrap();
        assert!(matches!(
            response.parse_registers(),
            Err(ModbusError::Protocol { .. })
        ));
    }

    #[test]
    fn test_check_matches() {
        let req = ModbusRequest::new_read(7, ModbusFunction::ReadInputRegisters, 0, 1);
        let ok = ModbusResponse::new_success(7, ModbusFunction::ReadInputRegisters, vec![2, 0, 1]);
        assert!(ok.check_matches(&req).is_ok());

        let wrong_slave = ModbusResponse::new_success(8, ModbusFunction::ReadInputRegisters, vec![]);
        assert!(wrong_slave.check_matches(&req).is_err());
    }

    #[test]
    fn test_check_write_echo() {
        let single = ModbusRequest {
            slave_id: 1,
            function: ModbusFunction::WriteSingleRegister,
            address: 210,
            quantity: 1,
            data: vec![0x12, 0x34],
        };
        let ok = ModbusResponse::new_success(1, single.function, vec![0x00, 0xD2, 0x12, 0x34]);
        assert!(ok.check_write_echo(&single).is_ok());
        let wrong_value =
            ModbusResponse::new_success(1, single.function, vec![0x00, 0xD2, 0x00, 0x00]);
        assert!(matches!(
            wrong_value.check_write_echo(&single),
            Err(ModbusError::Protocol { .. })
        ));

        let multiple = ModbusRequest {
            slave_id: 1,
            function: ModbusFunction::WriteMultipleRegisters,
            address: 10,
            quantity: 2,
            data: vec![0x86, 0xA0, 0x00, 0x01],
        };
        let ok = ModbusResponse::new_success(1, multiple.function, vec![0x00, 0x0A, 0x00, 0x02]);
        assert!(ok.check_write_echo(&multiple).is_ok());
        let wrong_address =
            ModbusResponse::new_success(1, multiple.function, vec![0x00, 0x0B, 0x00, 0x02]);
        assert!(wrong_address.check_write_echo(&multiple).is_err());
        let short = ModbusResponse::new_success(1, multiple.function, vec![0x00, 0x0A]);
        assert!(short.check_write_echo(&multiple).is_err());
    }

    #[test]
    fn test_bit_packing() {
        let bits = [true, false, true, true, false, false, false, false, true];
        let packed = pack_bits(&bits);
        assert_eq!(packed, vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(unpack_bits(&packed, bits.len()), bits.to_vec());
    }

    #[test]
    fn test_expected_response_len() {
        assert_eq!(expected_response_pdu_len(&[0x03]), None);
        assert_eq!(expected_response_pdu_len(&[0x03, 0x04]), Some(6));
        assert_eq!(expected_response_pdu_len(&[0x10]), Some(5));
        assert_eq!(expected_response_pdu_len(&[0x83]), Some(2));
        assert_eq!(expected_response_pdu_len(&[0x2B]), None);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x01, 0xAB]), "01 AB");
    }
}
