//! Error types for the register pipeline
//!
//! A single [`ModbusError`] covers header parsing, register-map documents,
//! value validation and transport failures. It is `Clone` so per-register
//! outcomes in read/write reports can carry the exact failure.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Every failure the register pipeline can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    /// Header text produced no usable register map.
    #[error("Malformed header: {message}")]
    MalformedHeader { message: String },

    /// Register-map document violates the canonical schema.
    #[error("Invalid register map schema: {message}")]
    InvalidSchema { message: String },

    /// Register name is not present in the loaded map.
    #[error("Unknown register: {name}")]
    UnknownRegister { name: String },

    /// Write value violates the declared range or the register width.
    #[error("Value {value} out of range [{min}, {max}] for register {name}")]
    OutOfRange {
        name: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Write attempted on a discrete input or input register.
    #[error("Register {name} is read-only")]
    ReadOnlyRegister { name: String },

    /// Response carried fewer words than the register needs.
    #[error("Incomplete response for {name}: expected {expected} words, got {received}")]
    IncompleteResponse {
        name: String,
        expected: usize,
        received: usize,
    },

    /// Connection could not be opened or was lost.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Device did not answer in time.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or mismatched frame.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Device answered with a Modbus exception.
    #[error("Modbus exception (function {function:02X}, code {code:02X}): {message}")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Request parameters the protocol cannot express.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Function code not supported for the operation.
    #[error("Invalid function code: {code:02X}")]
    InvalidFunction { code: u8 },

    /// Invalid configuration value.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Filesystem error while loading or saving maps.
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ModbusError {
    pub fn malformed_header<S: Into<String>>(message: S) -> Self {
        Self::MalformedHeader {
            message: message.into(),
        }
    }

    pub fn invalid_schema<S: Into<String>>(message: S) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    pub fn unknown_register<S: Into<String>>(name: S) -> Self {
        Self::UnknownRegister { name: name.into() }
    }

    pub fn read_only<S: Into<String>>(name: S) -> Self {
        Self::ReadOnlyRegister { name: name.into() }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build an exception error from the raw exception code.
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            code,
            message: exception_description(code).to_string(),
        }
    }

    /// True for failures raised by the transport rather than by validation.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::Protocol { .. }
                | Self::Exception { .. }
                | Self::Io { .. }
        )
    }

    /// True when the connection should be presumed unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Io { .. })
    }

    /// True for failures rejected before any network I/O.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownRegister { .. } | Self::OutOfRange { .. } | Self::ReadOnlyRegister { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof => Self::connection(err.to_string()),
            _ => Self::Io {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_schema(err.to_string())
    }
}

/// Human-readable text for a Modbus exception code.
pub fn exception_description(code: u8) -> &'static str {
    use crate::constants::*;

    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal data address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal data value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Server device failure",
        EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Server device busy",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway path unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway target device failed to respond",
        _ => "Unknown exception",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ModbusError::timeout("read", 1000).is_transport_error());
        assert!(!ModbusError::timeout("read", 1000).is_connection_error());
        assert!(ModbusError::connection("refused").is_connection_error());
        assert!(ModbusError::read_only("X").is_validation_error());
        assert!(!ModbusError::read_only("X").is_transport_error());
    }

    #[test]
    fn test_io_error_mapping() {
        let err: ModbusError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(err, ModbusError::Connection { .. }));

        let err: ModbusError = std::io::Error::new(std::io::ErrorKind::NotFound, "nope").into();
        assert!(matches!(err, ModbusError::Io { .. }));
    }

    #[test]
    fn test_exception_message() {
        let err = ModbusError::exception(0x03, 0x02);
        assert_eq!(
            err.to_string(),
            "Modbus exception (function 03, code 02): Illegal data address"
        );
    }

    #[test]
    fn test_out_of_range_display() {
        let err = ModbusError::OutOfRange {
            name: "MY_DEFAULT_HREG".into(),
            value: 150000,
            min: 0,
            max: 100000,
        };
        assert_eq!(
            err.to_string(),
            "Value 150000 out of range [0, 100000] for register MY_DEFAULT_HREG"
        );
    }
}
