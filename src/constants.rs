//! Modbus protocol constants and session defaults
//!
//! Frame sizes and per-request quantities follow the Modbus application
//! protocol: a PDU is at most 253 bytes (256-byte RS485 ADU minus slave
//! address and CRC), which bounds every read and write quantity below.

// ============================================================================
// Framing
// ============================================================================

/// MBAP header bytes preceding the length-counted part of a TCP frame
/// (transaction id, protocol id, length).
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size.
pub const MAX_PDU_SIZE: usize = 253;

/// Largest legal MBAP length field (unit id + PDU).
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Slave id + PDU + CRC.
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

// ============================================================================
// Quantity limits per request
// ============================================================================

/// FC03/FC04: 1 + 1 + 2N <= 253.
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC16: 1 + 2 + 2 + 1 + 2N <= 253.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// FC01/FC02.
pub const MAX_READ_COILS: u16 = 2000;

/// FC15.
pub const MAX_WRITE_COILS: u16 = 1968;

/// Widest register a map may declare, in 16-bit words.
pub const MAX_REGISTER_WIDTH: u16 = 2;

// ============================================================================
// Function codes
// ============================================================================

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Exception codes
// ============================================================================

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Session defaults
// ============================================================================

/// Modbus TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Serial line speed used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Unit id used when none is configured.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantities_fit_in_pdu() {
        assert!(1 + 1 + (MAX_READ_REGISTERS as usize) * 2 <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS as usize) * 2 <= MAX_PDU_SIZE);
        assert!(1 + 1 + (MAX_READ_COILS as usize).div_ceil(8) <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + (MAX_WRITE_COILS as usize).div_ceil(8) <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(MAX_MBAP_LENGTH, 254);
        assert_eq!(MAX_RTU_FRAME_SIZE, 256);
    }
}
