//! # Device Limits
//!
//! Per-device caps on request size and pacing, consulted by the batcher when
//! it splits register runs and by the register client between requests.
//!
//! | Class | Read cap | Write cap |
//! |-------|----------|-----------|
//! | Coils | 2000 | 1968 |
//! | Discrete inputs | 2000 | - |
//! | Holding registers | 125 | 123 |
//! | Input registers | 125 | - |
//!
//! Many field devices answer far fewer words per request than the protocol
//! allows; lower the caps for those.

use std::time::Duration;

use crate::constants::{
    MAX_READ_COILS, MAX_READ_REGISTERS, MAX_REGISTER_WIDTH, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::register_map::RegisterClass;

/// Default inter-request delay in milliseconds.
pub const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 0;

/// Request caps for one device.
///
/// # Example
///
/// ```rust
/// use modbus_regmap::{DeviceLimits, RegisterClass};
///
/// let limits = DeviceLimits::new()
///     .with_max_read_registers(50)
///     .with_inter_request_delay_ms(10);
///
/// assert_eq!(limits.max_read_for(RegisterClass::InputRegister), 50);
/// assert_eq!(limits.max_read_for(RegisterClass::Coil), 2000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Registers per FC03/FC04 request.
    pub max_read_registers: u16,
    /// Registers per FC16 request.
    pub max_write_registers: u16,
    /// Bits per FC01/FC02 request.
    pub max_read_coils: u16,
    /// Bits per FC15 request.
    pub max_write_coils: u16,
    /// Pause between consecutive requests (milliseconds).
    pub inter_request_delay_ms: u64,
}

impl DeviceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits for slow or old devices: 50 registers, 500 bits, 10ms pause.
    pub fn conservative() -> Self {
        Self {
            max_read_registers: 50,
            max_write_registers: 50,
            max_read_coils: 500,
            max_write_coils: 500,
            inter_request_delay_ms: 10,
        }
    }

    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count;
        self
    }

    pub fn with_max_write_registers(mut self, count: u16) -> Self {
        self.max_write_registers = count;
        self
    }

    pub fn with_max_read_coils(mut self, count: u16) -> Self {
        self.max_read_coils = count;
        self
    }

    pub fn with_max_write_coils(mut self, count: u16) -> Self {
        self.max_write_coils = count;
        self
    }

    pub fn with_inter_request_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_request_delay_ms = delay_ms;
        self
    }

    /// Largest read request for a class.
    pub fn max_read_for(&self, class: RegisterClass) -> u16 {
        if class.is_boolean() {
            self.max_read_coils
        } else {
            self.max_read_registers
        }
    }

    /// Largest write request for a class; 0 for read-only classes.
    pub fn max_write_for(&self, class: RegisterClass) -> u16 {
        match class {
            RegisterClass::Coil => self.max_write_coils,
            RegisterClass::HoldingRegister => self.max_write_registers,
            RegisterClass::DiscreteInput | RegisterClass::InputRegister => 0,
        }
    }

    /// Pause to insert between requests, if any.
    pub fn inter_request_delay(&self) -> Option<Duration> {
        (self.inter_request_delay_ms > 0)
            .then(|| Duration::from_millis(self.inter_request_delay_ms))
    }

    /// Number of read requests needed for `total` contiguous words of a class.
    pub fn read_request_count(&self, class: RegisterClass, total: u32) -> u32 {
        let cap = u32::from(self.max_read_for(class).max(1));
        total.div_ceil(cap)
    }

    /// Reject caps above what a single PDU can carry, and caps too small
    /// to move one register in one request.
    pub fn validate(&self) -> ModbusResult<()> {
        let checks = [
            ("max_read_registers", self.max_read_registers, MAX_REGISTER_WIDTH, MAX_READ_REGISTERS),
            ("max_write_registers", self.max_write_registers, MAX_REGISTER_WIDTH, MAX_WRITE_REGISTERS),
            ("max_read_coils", self.max_read_coils, 1, MAX_READ_COILS),
            ("max_write_coils", self.max_write_coils, 1, MAX_WRITE_COILS),
        ];
        for (field, value, floor, ceiling) in checks {
            if value < floor || value > ceiling {
                return Err(ModbusError::configuration(format!(
                    "{} must be between {} and {}, got {}",
                    field, floor, ceiling, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_read_registers: MAX_READ_REGISTERS,
            max_write_registers: MAX_WRITE_REGISTERS,
            max_read_coils: MAX_READ_COILS,
            max_write_coils: MAX_WRITE_COILS,
            inter_request_delay_ms: DEFAULT_INTER_REQUEST_DELAY_MS,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = DeviceLimits::default();
        assert_eq!(limits.max_read_registers, 125);
        assert_eq!(limits.max_write_registers, 123);
        assert_eq!(limits.max_read_coils, 2000);
        assert_eq!(limits.max_write_coils, 1968);
        assert_eq!(limits.inter_request_delay(), None);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_conservative_limits() {
        let limits = DeviceLimits::conservative();
        assert_eq!(limits.max_read_for(RegisterClass::HoldingRegister), 50);
        assert_eq!(limits.max_read_for(RegisterClass::DiscreteInput), 500);
        assert_eq!(
            limits.inter_request_delay(),
            Some(Duration::from_millis(10))
        );
    }

    #[test]
    fn test_per_class_caps() {
        let limits = DeviceLimits::new()
            .with_max_read_registers(60)
            .with_max_write_registers(40)
            .with_max_write_coils(8);

        assert_eq!(limits.max_read_for(RegisterClass::InputRegister), 60);
        assert_eq!(limits.max_write_for(RegisterClass::HoldingRegister), 40);
        assert_eq!(limits.max_write_for(RegisterClass::Coil), 8);
        assert_eq!(limits.max_write_for(RegisterClass::InputRegister), 0);
    }

    #[test]
    fn test_read_request_count() {
        let limits = DeviceLimits::new().with_max_read_registers(50);

        assert_eq!(limits.read_request_count(RegisterClass::HoldingRegister, 0), 0);
        assert_eq!(limits.read_request_count(RegisterClass::HoldingRegister, 50), 1);
        assert_eq!(limits.read_request_count(RegisterClass::HoldingRegister, 51), 2);
        assert_eq!(limits.read_request_count(RegisterClass::Coil, 51), 1);
    }

    #[test]
    fn test_validate_rejects_bad_caps() {
        assert!(DeviceLimits::new().with_max_read_registers(0).validate().is_err());
        assert!(DeviceLimits::new().with_max_read_registers(126).validate().is_err());
        assert!(DeviceLimits::new().with_max_write_coils(1969).validate().is_err());

        // A 32-bit register must fit in one request
        assert!(DeviceLimits::new().with_max_read_registers(1).validate().is_err());
        assert!(DeviceLimits::new().with_max_write_registers(1).validate().is_err());
        assert!(DeviceLimits::new().with_max_read_registers(2).validate().is_ok());
        assert!(DeviceLimits::new().with_max_read_coils(1).validate().is_ok());
    }
}
