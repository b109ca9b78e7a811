//! # Register Values
//!
//! Decoded register contents. Boolean classes yield [`RegisterValue::Bool`],
//! single-width numeric registers [`RegisterValue::U16`] and width-2 registers
//! [`RegisterValue::U32`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A decoded register value, or a value to write.
///
/// Serializes untagged, so a read report renders as plain JSON scalars.
///
/// # Example
///
/// ```rust
/// use modbus_regmap::RegisterValue;
///
/// let uptime = RegisterValue::U32(0x1FFFF);
/// assert_eq!(uptime.register_count(), 2);
/// assert_eq!(uptime.as_i64(), 131071);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// Coil or discrete input state
    Bool(bool),
    /// Single 16-bit register
    U16(u16),
    /// Two registers, low word first
    U32(u32),
    /// Caller-supplied write value not yet narrowed to a register width
    I64(i64),
}

impl RegisterValue {
    /// Numeric view; `true` is 1.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            RegisterValue::Bool(b) => i64::from(*b),
            RegisterValue::U16(v) => i64::from(*v),
            RegisterValue::U32(v) => i64::from(*v),
            RegisterValue::I64(v) => *v,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.as_i64() as f64
    }

    /// Boolean view; any non-zero number is `true`.
    #[inline]
    pub fn as_bool(&self) -> bool {
        match self {
            RegisterValue::Bool(b) => *b,
            other => other.as_i64() != 0,
        }
    }

    /// Raw 16-bit words occupied by this value.
    #[inline]
    pub fn register_count(&self) -> usize {
        match self {
            RegisterValue::Bool(_) | RegisterValue::U16(_) => 1,
            RegisterValue::U32(_) => 2,
            RegisterValue::I64(v) if u16::try_from(*v).is_ok() => 1,
            RegisterValue::I64(_) => 2,
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.as_i64() == 0
    }

    /// Type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            RegisterValue::Bool(_) => "bool",
            RegisterValue::U16(_) => "u16",
            RegisterValue::U32(_) => "u32",
            RegisterValue::I64(_) => "i64",
        }
    }

    /// Parse a command-line style value: `true`/`false`/`on`/`off`, decimal
    /// or `0x`-prefixed hexadecimal integers.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text.to_ascii_lowercase().as_str() {
            "true" | "on" => return Some(RegisterValue::Bool(true)),
            "false" | "off" => return Some(RegisterValue::Bool(false)),
            _ => {}
        }
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => i64::from_str_radix(hex, 16).ok()?,
            None => text.parse::<i64>().ok()?,
        };
        Some(RegisterValue::I64(parsed))
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Bool(v) => write!(f, "{}", v),
            RegisterValue::U16(v) => write!(f, "{}", v),
            RegisterValue::U32(v) => write!(f, "{}", v),
            RegisterValue::I64(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for RegisterValue {
    fn from(v: bool) -> Self {
        RegisterValue::Bool(v)
    }
}

impl From<u16> for RegisterValue {
    fn from(v: u16) -> Self {
        RegisterValue::U16(v)
    }
}

impl From<u32> for RegisterValue {
    fn from(v: u32) -> Self {
        RegisterValue::U32(v)
    }
}

impl From<i64> for RegisterValue {
    fn from(v: i64) -> Self {
        RegisterValue::I64(v)
    }
}

impl From<i32> for RegisterValue {
    fn from(v: i32) -> Self {
        RegisterValue::I64(i64::from(v))
    }
}
