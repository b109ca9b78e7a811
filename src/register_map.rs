//! # Register Map Model
//!
//! In-memory description of a device's Modbus registers, grouped by class.
//!
//! | Class | JSON key | Access | Raw word |
//! |-------|----------|--------|----------|
//! | Coil | `COILS` | read/write | boolean |
//! | Holding register | `HREGS` | read/write | u16 |
//! | Discrete input | `ISTS` | read-only | boolean |
//! | Input register | `IREGS` | read-only | u16 |
//!
//! Definitions keep insertion order, which is the order they appeared in the
//! source header. A width-2 definition spans `address` and `address + 1`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// The four Modbus data tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegisterClass {
    #[serde(rename = "COILS")]
    Coil,
    #[serde(rename = "HREGS")]
    HoldingRegister,
    #[serde(rename = "ISTS")]
    DiscreteInput,
    #[serde(rename = "IREGS")]
    InputRegister,
}

impl RegisterClass {
    /// All classes in canonical order.
    pub const ALL: [RegisterClass; 4] = [
        RegisterClass::Coil,
        RegisterClass::HoldingRegister,
        RegisterClass::DiscreteInput,
        RegisterClass::InputRegister,
    ];

    /// Key of this class in register-map documents.
    pub fn json_key(&self) -> &'static str {
        match self {
            Self::Coil => "COILS",
            Self::HoldingRegister => "HREGS",
            Self::DiscreteInput => "ISTS",
            Self::InputRegister => "IREGS",
        }
    }

    /// Inverse of [`json_key`](Self::json_key), case-insensitive.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_uppercase().as_str() {
            "COILS" | "COIL" => Some(Self::Coil),
            "HREGS" | "HREG" => Some(Self::HoldingRegister),
            "ISTS" => Some(Self::DiscreteInput),
            "IREGS" | "IREG" => Some(Self::InputRegister),
            _ => None,
        }
    }

    /// Class implied by a register name suffix such as `_HREG`.
    pub fn from_name_suffix(name: &str) -> Option<Self> {
        if name.ends_with("_COIL") {
            Some(Self::Coil)
        } else if name.ends_with("_HREG") {
            Some(Self::HoldingRegister)
        } else if name.ends_with("_ISTS") {
            Some(Self::DiscreteInput)
        } else if name.ends_with("_IREG") {
            Some(Self::InputRegister)
        } else {
            None
        }
    }

    /// Coils and holding registers accept writes.
    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    /// Coils and discrete inputs carry single bits.
    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// Function code used to read this class.
    pub fn read_function(&self) -> u8 {
        match self {
            Self::Coil => FC_READ_COILS,
            Self::DiscreteInput => FC_READ_DISCRETE_INPUTS,
            Self::HoldingRegister => FC_READ_HOLDING_REGISTERS,
            Self::InputRegister => FC_READ_INPUT_REGISTERS,
        }
    }

    /// Function code used to write `count` values, if the class is writable.
    pub fn write_function(&self, count: usize) -> Option<u8> {
        match (self, count) {
            (Self::Coil, 1) => Some(FC_WRITE_SINGLE_COIL),
            (Self::Coil, _) => Some(FC_WRITE_MULTIPLE_COILS),
            (Self::HoldingRegister, 1) => Some(FC_WRITE_SINGLE_REGISTER),
            (Self::HoldingRegister, _) => Some(FC_WRITE_MULTIPLE_REGISTERS),
            _ => None,
        }
    }
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_key())
    }
}

/// Inclusive numeric bounds declared for a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterRange {
    pub min: i64,
    pub max: i64,
}

impl RegisterRange {
    /// Fails when `min > max`.
    pub fn new(min: i64, max: i64) -> ModbusResult<Self> {
        if min > max {
            return Err(ModbusError::invalid_data(format!(
                "range minimum {} exceeds maximum {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for RegisterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// One named register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDefinition {
    pub name: String,
    pub class: RegisterClass,
    /// Low address of the register.
    pub address: u16,
    /// 1 for native registers, 2 for 32-bit values split low word first.
    pub width: u8,
    /// Free-text unit, empty when absent.
    pub unit: String,
    pub range: Option<RegisterRange>,
    pub description: String,
}

impl RegisterDefinition {
    /// Single-width definition with no unit, range or description.
    pub fn new<S: Into<String>>(name: S, class: RegisterClass, address: u16) -> Self {
        Self {
            name: name.into(),
            class,
            address,
            width: 1,
            unit: String::new(),
            range: None,
            description: String::new(),
        }
    }

    pub fn with_width(mut self, width: u8) -> Self {
        self.width = width;
        self
    }

    pub fn with_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_range(mut self, range: RegisterRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Last address occupied by this register.
    #[inline]
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.width) - 1
    }

    /// Whether two definitions share at least one address.
    pub fn overlaps(&self, other: &RegisterDefinition) -> bool {
        u32::from(self.address) <= other.end_address()
            && u32::from(other.address) <= self.end_address()
    }

    /// Range that applies to writes; boolean classes ignore declared ranges.
    pub fn effective_range(&self) -> Option<RegisterRange> {
        if self.class.is_boolean() {
            None
        } else {
            self.range
        }
    }

    /// Check the structural invariants of a single definition.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.name.is_empty() {
            return Err(ModbusError::invalid_data("register name is empty"));
        }
        if self.width != 1 && self.width != 2 {
            return Err(ModbusError::invalid_data(format!(
                "register {} has unsupported width {}",
                self.name, self.width
            )));
        }
        if self.end_address() > u32::from(u16::MAX) {
            return Err(ModbusError::invalid_data(format!(
                "register {} at {} with width {} exceeds the address space",
                self.name, self.address, self.width
            )));
        }
        if let Some(range) = self.range {
            if range.min > range.max {
                return Err(ModbusError::invalid_data(format!(
                    "register {} has range {} with min > max",
                    self.name, range
                )));
            }
        }
        Ok(())
    }
}

/// Creation details taken from the banner comment of a header file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

impl HeaderMeta {
    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.modified.is_none()
    }
}

/// Registers of one device, grouped by class in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterMap {
    coils: Vec<RegisterDefinition>,
    holding_registers: Vec<RegisterDefinition>,
    discrete_inputs: Vec<RegisterDefinition>,
    input_registers: Vec<RegisterDefinition>,
    meta: HeaderMeta,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a definition to its class.
    ///
    /// Fails when the definition is invalid, its name is already used in the
    /// class, or its address span overlaps another register of the class.
    pub fn insert(&mut self, definition: RegisterDefinition) -> ModbusResult<()> {
        definition.validate()?;

        let existing = self.registers(definition.class);
        if let Some(dup) = existing.iter().find(|d| d.name == definition.name) {
            return Err(ModbusError::invalid_data(format!(
                "duplicate register name {} in {} (address {})",
                dup.name, definition.class, dup.address
            )));
        }
        if let Some(other) = existing.iter().find(|d| d.overlaps(&definition)) {
            return Err(ModbusError::invalid_data(format!(
                "register {} at {} overlaps {} at {} in {}",
                definition.name, definition.address, other.name, other.address, definition.class
            )));
        }

        self.registers_mut(definition.class).push(definition);
        Ok(())
    }

    /// Definitions of one class, in insertion order.
    pub fn registers(&self, class: RegisterClass) -> &[RegisterDefinition] {
        match class {
            RegisterClass::Coil => &self.coils,
            RegisterClass::HoldingRegister => &self.holding_registers,
            RegisterClass::DiscreteInput => &self.discrete_inputs,
            RegisterClass::InputRegister => &self.input_registers,
        }
    }

    fn registers_mut(&mut self, class: RegisterClass) -> &mut Vec<RegisterDefinition> {
        match class {
            RegisterClass::Coil => &mut self.coils,
            RegisterClass::HoldingRegister => &mut self.holding_registers,
            RegisterClass::DiscreteInput => &mut self.discrete_inputs,
            RegisterClass::InputRegister => &mut self.input_registers,
        }
    }

    /// Look up a register by class and name.
    pub fn get(&self, class: RegisterClass, name: &str) -> Option<&RegisterDefinition> {
        self.registers(class).iter().find(|d| d.name == name)
    }

    /// Look up a register by name across all classes, in canonical class order.
    pub fn find(&self, name: &str) -> Option<&RegisterDefinition> {
        self.iter().find(|d| d.name == name)
    }

    /// All definitions, class by class.
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDefinition> {
        RegisterClass::ALL
            .into_iter()
            .flat_map(move |class| self.registers(class).iter())
    }

    pub fn len(&self) -> usize {
        self.coils.len()
            + self.holding_registers.len()
            + self.discrete_inputs.len()
            + self.input_registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn meta(&self) -> &HeaderMeta {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: HeaderMeta) {
        self.meta = meta;
    }

    /// Copy with every class sorted alphabetically by name, for display.
    pub fn sorted(&self) -> RegisterMap {
        let mut sorted = self.clone();
        for class in RegisterClass::ALL {
            sorted.registers_mut(class).sort_by(|a, b| a.name.cmp(&b.name));
        }
        sorted
    }
}
