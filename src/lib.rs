//! # Modbus RegMap - Header-Driven Modbus Register Maps
//!
//! Describe a device's registers once, in the C header its firmware already
//! uses, and read or write them by name over Modbus TCP or RTU.
//!
//! ## Pipeline
//!
//! ```text
//! modbusRegisters.h --HeaderParser--> RegisterMap <--json--> registers.json
//!                                          |
//!                                   RegisterClient --RegisterIo--> TCP / RTU
//!                                          |
//!                                  ReadReport / WriteReport
//! ```
//!
//! ## Features
//!
//! - **Header parsing**: section markers, unit and range annotations, paired
//!   32-bit defines
//! - **Canonical JSON**: lossless round trip of register maps
//! - **Batched I/O**: adjacent registers merged into one request, capped per
//!   device
//! - **Typed values**: 32-bit quantities rebuilt from two registers
//! - **Per-register results**: one failing register never hides the others
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_regmap::{
//!     ClientConfig, Connection, GenericModbusClient, HeaderParser, ModbusResult,
//!     ParserOptions, RegisterClass, RegisterClient, RegisterValue, TransportConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let parsed = HeaderParser::new(ParserOptions::default()).parse_file("modbusRegisters.h")?;
//!
//!     let transport = TransportConfig::tcp("127.0.0.1", 502, 1);
//!     let io = GenericModbusClient::new(Connection::open(&transport).await?);
//!     let mut client = RegisterClient::new(parsed.map, io, ClientConfig::new(transport.unit()))?;
//!
//!     let report = client.read_all(&RegisterClass::ALL).await?;
//!     println!("{}", report.to_json());
//!
//!     client.write_one("MY_DEFAULT_HREG", RegisterValue::I64(100000)).await?;
//!     client.close().await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants and request limits
pub mod constants;

/// Modbus protocol definitions and message handling
pub mod protocol;

/// Network transport layer for TCP and RTU communication
pub mod transport;

/// FC-level client and the class-addressed register I/O contract
pub mod client;

/// Logging system for the library
pub mod logging;

// ============================================================================
// Register pipeline
// ============================================================================

/// Register map model
pub mod register_map;

/// Header file parser
pub mod header;

/// Register map JSON documents
pub mod json;

/// Register values
pub mod value;

/// Raw word encoding and decoding
pub mod codec;

/// Request run planning
pub mod batcher;

/// Device-specific protocol limits configuration
pub mod device_limits;

/// Map-driven read and write orchestration
pub mod register_client;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use modbus_regmap::tokio) ===
pub use tokio;

// === Register pipeline ===
pub use header::{HeaderParser, ParseWarning, ParsedHeader, ParserOptions};
pub use json::SerializeOptions;
pub use register_client::{
    ClientConfig, ReadReport, RegisterClient, RegisterOutcome, UnitOverride, WriteReport,
};
pub use register_map::{HeaderMeta, RegisterClass, RegisterDefinition, RegisterMap, RegisterRange};

// === Core client API ===
pub use client::{ConnectionClient, GenericModbusClient, ModbusClient, RegisterIo};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use codec::{combine_words, decode_register, encode_register, split_words, WordOrder};
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
pub use value::RegisterValue;

// === Batching ===
pub use batcher::{RegisterSpan, RequestBatcher, RequestRun};
pub use device_limits::DeviceLimits;

// === Transport ===
pub use transport::{Connection, ModbusTransport, TcpTransport, TransportConfig, TransportStats};

#[cfg(feature = "rtu")]
pub use transport::RtuTransport;

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS, DEFAULT_UNIT_ID, MAX_PDU_SIZE, MAX_READ_COILS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus RegMap v{} - header-driven Modbus register maps", VERSION)
}
