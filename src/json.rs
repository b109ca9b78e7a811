//! # Register Map Documents
//!
//! Canonical JSON form of a [`RegisterMap`]:
//!
//! ```json
//! {
//!   "COILS": [{"name": "SOME_EXAMPLE_COIL", "address": 10, "description": "..."}],
//!   "HREGS": [{"name": "MY_DEFAULT_HREG", "address": 10, "width": 2,
//!              "range": [0, 100000], "description": "..."}],
//!   "ISTS": [],
//!   "IREGS": [{"name": "LOOP_TIME_US_IREG", "address": 10, "width": 2, "unit": "us",
//!              "description": "..."}],
//!   "META": {"created": "24.07.2021"}
//! }
//! ```
//!
//! `width` is omitted when 1, `unit` when empty and `range` when absent.
//! Loading is strict: a document that breaks any structural rule yields
//! [`ModbusError::InvalidSchema`] and no map at all.

use std::borrow::Cow;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{ModbusError, ModbusResult};
use crate::register_map::{HeaderMeta, RegisterClass, RegisterDefinition, RegisterMap, RegisterRange};

const META_KEY: &str = "META";

/// Output settings for [`to_json`] and [`to_json_string`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Sort each class alphabetically by name instead of source order.
    pub sorted: bool,
    /// Indent the string form.
    pub pretty: bool,
}

impl SerializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

// ============================================================================
// Serialization
// ============================================================================

/// Build the JSON document for a map.
pub fn to_json(map: &RegisterMap, options: &SerializeOptions) -> Value {
    let map: Cow<'_, RegisterMap> = if options.sorted {
        Cow::Owned(map.sorted())
    } else {
        Cow::Borrowed(map)
    };

    let mut doc = Map::new();
    for class in RegisterClass::ALL {
        let items = map.registers(class).iter().map(definition_to_json).collect();
        doc.insert(class.json_key().to_string(), Value::Array(items));
    }

    let meta = map.meta();
    if !meta.is_empty() {
        let mut entry = Map::new();
        if let Some(ref created) = meta.created {
            entry.insert("created".into(), json!(created));
        }
        if let Some(ref modified) = meta.modified {
            entry.insert("modified".into(), json!(modified));
        }
        doc.insert(META_KEY.to_string(), Value::Object(entry));
    }

    Value::Object(doc)
}

fn definition_to_json(def: &RegisterDefinition) -> Value {
    let mut obj = Map::new();
    obj.insert("name".into(), json!(def.name));
    obj.insert("address".into(), json!(def.address));
    if def.width != 1 {
        obj.insert("width".into(), json!(def.width));
    }
    if !def.unit.is_empty() {
        obj.insert("unit".into(), json!(def.unit));
    }
    if let Some(range) = def.range {
        obj.insert("range".into(), json!([range.min, range.max]));
    }
    obj.insert("description".into(), json!(def.description));
    Value::Object(obj)
}

/// String form of [`to_json`].
pub fn to_json_string(map: &RegisterMap, options: &SerializeOptions) -> ModbusResult<String> {
    let doc = to_json(map, options);
    let text = if options.pretty {
        serde_json::to_string_pretty(&doc)?
    } else {
        serde_json::to_string(&doc)?
    };
    Ok(text)
}

/// Write a map to `path`.
pub fn save_file<P: AsRef<Path>>(
    path: P,
    map: &RegisterMap,
    options: &SerializeOptions,
) -> ModbusResult<()> {
    let path = path.as_ref();
    let text = to_json_string(map, options)?;
    std::fs::write(path, text)?;
    info!("Saved {} register(s) to {}", map.len(), path.display());
    Ok(())
}

// ============================================================================
// Deserialization
// ============================================================================

/// Load a map from a JSON document.
///
/// A missing class key yields an empty class. Unknown top-level keys are
/// ignored.
pub fn from_json(doc: &Value) -> ModbusResult<RegisterMap> {
    let obj = doc
        .as_object()
        .ok_or_else(|| ModbusError::invalid_schema("document is not an object"))?;

    let mut map = RegisterMap::new();
    for class in RegisterClass::ALL {
        let key = class.json_key();
        let items = match obj.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ModbusError::invalid_schema(format!("{} is not an array", key)));
            }
        };

        for (idx, item) in items.iter().enumerate() {
            let def = definition_from_json(class, item)
                .map_err(|msg| ModbusError::invalid_schema(format!("{}[{}]: {}", key, idx, msg)))?;
            map.insert(def)
                .map_err(|err| ModbusError::invalid_schema(format!("{}[{}]: {}", key, idx, err)))?;
        }
    }

    if let Some(meta) = obj.get(META_KEY) {
        map.set_meta(meta_from_json(meta)?);
    }

    for key in obj.keys() {
        if key != META_KEY && RegisterClass::from_key(key).is_none() {
            debug!("Ignoring unknown register map key {}", key);
        }
    }

    Ok(map)
}

fn definition_from_json(class: RegisterClass, item: &Value) -> Result<RegisterDefinition, String> {
    let obj = item.as_object().ok_or("entry is not an object")?;

    let name = match obj.get("name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        Some(_) => return Err("name must be a non-empty string".into()),
        None => return Err("name is missing".into()),
    };

    let address = match obj.get("address") {
        None => return Err(format!("{}: address is missing", name)),
        Some(value) => match (value.as_u64(), value.as_i64()) {
            (Some(a), _) => u16::try_from(a)
                .map_err(|_| format!("{}: address {} exceeds 65535", name, a))?,
            (None, Some(a)) => return Err(format!("{}: address {} is negative", name, a)),
            (None, None) => return Err(format!("{}: address is not an integer", name)),
        },
    };

    let width = match obj.get("width") {
        None => 1,
        Some(value) => match value.as_u64() {
            Some(w @ (1 | 2)) => w as u8,
            _ => return Err(format!("{}: width must be 1 or 2, got {}", name, value)),
        },
    };

    let unit = optional_string(obj, "unit").map_err(|msg| format!("{}: {}", name, msg))?;
    let description =
        optional_string(obj, "description").map_err(|msg| format!("{}: {}", name, msg))?;

    let mut def = RegisterDefinition::new(name.clone(), class, address)
        .with_width(width)
        .with_unit(unit)
        .with_description(description);

    match obj.get("range") {
        None | Some(Value::Null) => {}
        Some(value) => {
            let bounds = value
                .as_array()
                .filter(|a| a.len() == 2)
                .and_then(|a| Some((a[0].as_i64()?, a[1].as_i64()?)))
                .ok_or_else(|| format!("{}: range must be [min, max] integers", name))?;
            let range = RegisterRange::new(bounds.0, bounds.1)
                .map_err(|_| format!("{}: range min {} exceeds max {}", name, bounds.0, bounds.1))?;
            def = def.with_range(range);
        }
    }

    Ok(def)
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Result<String, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(format!("{} must be a string", key)),
    }
}

fn meta_from_json(value: &Value) -> ModbusResult<HeaderMeta> {
    let obj = value
        .as_object()
        .ok_or_else(|| ModbusError::invalid_schema("META is not an object"))?;
    let field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
    Ok(HeaderMeta {
        created: field("created"),
        modified: field("modified"),
    })
}

/// Parse JSON text and load the map.
pub fn from_json_str(text: &str) -> ModbusResult<RegisterMap> {
    let doc: Value = serde_json::from_str(text)?;
    from_json(&doc)
}

/// Read a register-map file.
pub fn load_file<P: AsRef<Path>>(path: P) -> ModbusResult<RegisterMap> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let map = from_json_str(&text)?;
    info!("Loaded {} register(s) from {}", map.len(), path.display());
    Ok(map)
}
