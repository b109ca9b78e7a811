//! # Register Codec
//!
//! Conversion between raw 16-bit words and [`RegisterValue`]s for a given
//! [`RegisterDefinition`].
//!
//! | Class | Width | Decoded as |
//! |-------|-------|------------|
//! | Coil / discrete input | 1 | `Bool(word != 0)` |
//! | Holding / input register | 1 | `U16(word)` |
//! | Holding / input register | 2 | `U32(low \| high << 16)` |
//!
//! Reads are never range-checked or clamped: the device is authoritative.
//! Writes are validated against the declared range and the register width
//! before anything is encoded.

use crate::error::{ModbusError, ModbusResult};
use crate::register_map::RegisterDefinition;
use crate::value::RegisterValue;

/// Order of the two words of a width-2 register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WordOrder {
    /// Low 16 bits at the lower address.
    #[default]
    LowWordFirst,
    /// High 16 bits at the lower address.
    HighWordFirst,
}

impl WordOrder {
    /// Accepts `low`, `low_first`, `cdab`, `high`, `high_first`, `abcd`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "low" | "lowfirst" | "lowwordfirst" | "cdab" => Some(Self::LowWordFirst),
            "high" | "highfirst" | "highwordfirst" | "abcd" => Some(Self::HighWordFirst),
            _ => None,
        }
    }
}

/// Combine the two raw words of a width-2 register.
///
/// ```rust
/// use modbus_regmap::{combine_words, WordOrder};
///
/// assert_eq!(combine_words([0xFFFF, 0x0001], WordOrder::LowWordFirst), 0x1FFFF);
/// ```
#[inline]
pub fn combine_words(words: [u16; 2], order: WordOrder) -> u32 {
    let (low, high) = match order {
        WordOrder::LowWordFirst => (words[0], words[1]),
        WordOrder::HighWordFirst => (words[1], words[0]),
    };
    u32::from(low) | (u32::from(high) << 16)
}

/// Split a 32-bit value into the two words written for a width-2 register.
#[inline]
pub fn split_words(value: u32, order: WordOrder) -> [u16; 2] {
    let low = (value & 0xFFFF) as u16;
    let high = (value >> 16) as u16;
    match order {
        WordOrder::LowWordFirst => [low, high],
        WordOrder::HighWordFirst => [high, low],
    }
}

/// Decode a register from the words starting at its address.
///
/// `words` may be longer than the register; extra words are ignored. Fails
/// with [`ModbusError::IncompleteResponse`] when fewer words than the
/// register width are available.
pub fn decode_register(
    definition: &RegisterDefinition,
    words: &[u16],
    order: WordOrder,
) -> ModbusResult<RegisterValue> {
    let needed = usize::from(definition.width);
    if words.len() < needed {
        return Err(ModbusError::IncompleteResponse {
            name: definition.name.clone(),
            expected: needed,
            received: words.len(),
        });
    }

    if definition.class.is_boolean() {
        return Ok(RegisterValue::Bool(words[0] != 0));
    }

    match definition.width {
        1 => Ok(RegisterValue::U16(words[0])),
        2 => Ok(RegisterValue::U32(combine_words([words[0], words[1]], order))),
        other => Err(ModbusError::invalid_data(format!(
            "register {} has unsupported width {}",
            definition.name, other
        ))),
    }
}

/// Bounds a value must satisfy to be written to this register.
///
/// The declared range applies when present; the register width always does.
pub fn write_bounds(definition: &RegisterDefinition) -> (i64, i64) {
    let (type_min, type_max) = if definition.class.is_boolean() {
        (0, 1)
    } else if definition.width == 2 {
        (0, i64::from(u32::MAX))
    } else {
        (0, i64::from(u16::MAX))
    };

    match definition.effective_range() {
        Some(range) => (range.min.max(type_min), range.max.min(type_max)),
        None => (type_min, type_max),
    }
}

/// Validate a write value and encode it into raw words.
///
/// Checks writability first, then bounds. Boolean classes encode to a single
/// 0/1 word; width-2 registers are split per `order`.
pub fn encode_register(
    definition: &RegisterDefinition,
    value: RegisterValue,
    order: WordOrder,
) -> ModbusResult<Vec<u16>> {
    if !definition.class.is_writable() {
        return Err(ModbusError::read_only(&definition.name));
    }

    let numeric = value.as_i64();
    let (min, max) = write_bounds(definition);
    if numeric < min || numeric > max {
        // Report the declared range when one exists, so callers see their own bounds
        let (min, max) = definition
            .effective_range()
            .map(|r| (r.min, r.max))
            .unwrap_or((min, max));
        return Err(ModbusError::OutOfRange {
            name: definition.name.clone(),
            value: numeric,
            min,
            max,
        });
    }

    if definition.class.is_boolean() {
        return Ok(vec![u16::from(numeric != 0)]);
    }

    match definition.width {
        1 => Ok(vec![numeric as u16]),
        _ => Ok(split_words(numeric as u32, order).to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_map::{RegisterClass, RegisterRange};

    fn hreg(width: u8) -> RegisterDefinition {
        RegisterDefinition::new("MY_DEFAULT_HREG", RegisterClass::HoldingRegister, 10)
            .with_width(width)
    }

    #[test]
    fn test_decode_width_two_low_word_first() {
        let def = hreg(2);
        assert_eq!(
            decode_register(&def, &[0x0001, 0x0000], WordOrder::LowWordFirst).unwrap(),
            RegisterValue::U32(1)
        );
        assert_eq!(
            decode_register(&def, &[0xFFFF, 0x0001], WordOrder::LowWordFirst).unwrap(),
            RegisterValue::U32(0x1FFFF)
        );
    }

    #[test]
    fn test_decode_width_two_high_word_first() {
        let def = hreg(2);
        assert_eq!(
            decode_register(&def, &[0x0001, 0xFFFF], WordOrder::HighWordFirst).unwrap(),
            RegisterValue::U32(0x1FFFF)
        );
    }

    #[test]
    fn test_decode_single_and_boolean() {
        assert_eq!(
            decode_register(&hreg(1), &[0xFFFF], WordOrder::default()).unwrap(),
            RegisterValue::U16(0xFFFF)
        );

        let coil = RegisterDefinition::new("SOME_EXAMPLE_COIL", RegisterClass::Coil, 10);
        assert_eq!(
            decode_register(&coil, &[1], WordOrder::default()).unwrap(),
            RegisterValue::Bool(true)
        );
        assert_eq!(
            decode_register(&coil, &[0], WordOrder::default()).unwrap(),
            RegisterValue::Bool(false)
        );
    }

    #[test]
    fn test_decode_does_not_clamp_to_range() {
        let def = hreg(2).with_range(RegisterRange::new(0, 100000).unwrap());
        assert_eq!(
            decode_register(&def, &[0xFFFF, 0xFFFF], WordOrder::default()).unwrap(),
            RegisterValue::U32(u32::MAX)
        );
    }

    #[test]
    fn test_decode_incomplete() {
        let err = decode_register(&hreg(2), &[0x0001], WordOrder::default()).unwrap_err();
        assert_eq!(
            err,
            ModbusError::IncompleteResponse {
                name: "MY_DEFAULT_HREG".into(),
                expected: 2,
                received: 1,
            }
        );
    }

    #[test]
    fn test_encode_range_validation() {
        let def = hreg(2).with_range(RegisterRange::new(0, 100000).unwrap());

        let err = encode_register(&def, RegisterValue::I64(150000), WordOrder::default())
            .unwrap_err();
        assert_eq!(
            err,
            ModbusError::OutOfRange {
                name: "MY_DEFAULT_HREG".into(),
                value: 150000,
                min: 0,
                max: 100000,
            }
        );

        let words = encode_register(&def, RegisterValue::I64(100000), WordOrder::default()).unwrap();
        assert_eq!(words, vec![0x86A0, 0x0001]);
    }

    #[test]
    fn test_encode_width_bounds() {
        assert!(encode_register(&hreg(1), RegisterValue::I64(65536), WordOrder::default()).is_err());
        assert!(encode_register(&hreg(1), RegisterValue::I64(-1), WordOrder::default()).is_err());
        assert_eq!(
            encode_register(&hreg(1), RegisterValue::U16(65535), WordOrder::default()).unwrap(),
            vec![0xFFFF]
        );
    }

    #[test]
    fn test_encode_read_only() {
        for class in [RegisterClass::DiscreteInput, RegisterClass::InputRegister] {
            let def = RegisterDefinition::new("RO", class, 0);
            assert_eq!(
                encode_register(&def, RegisterValue::Bool(false), WordOrder::default()),
                Err(ModbusError::read_only("RO"))
            );
        }
    }

    #[test]
    fn test_encode_coil() {
        let coil = RegisterDefinition::new("C", RegisterClass::Coil, 3);
        assert_eq!(
            encode_register(&coil, true.into(), WordOrder::default()).unwrap(),
            vec![1]
        );
        assert!(encode_register(&coil, RegisterValue::I64(2), WordOrder::default()).is_err());
    }

    #[test]
    fn test_split_and_combine() {
        for order in [WordOrder::LowWordFirst, WordOrder::HighWordFirst] {
            assert_eq!(combine_words(split_words(0xDEADBEEF, order), order), 0xDEADBEEF);
        }
        assert_eq!(split_words(0x0001_0002, WordOrder::LowWordFirst), [0x0002, 0x0001]);
    }

    #[test]
    fn test_word_order_from_str() {
        assert_eq!(WordOrder::from_str("low_first"), Some(WordOrder::LowWordFirst));
        assert_eq!(WordOrder::from_str("ABCD"), Some(WordOrder::HighWordFirst));
        assert_eq!(WordOrder::from_str("middle"), None);
    }
}
