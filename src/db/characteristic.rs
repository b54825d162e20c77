use serde_json::json;

use super::{status, Iid};

/// Characteristic value formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Boolean
    Bool,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// Signed 32-bit integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 string
    Str,
    /// Base64-encoded TLV8
    Tlv8,
    /// Base64-encoded opaque data
    Data,
}

impl Format {
    /// The `format` string in the JSON surface
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
            Self::Tlv8 => "tlv8",
            Self::Data => "data",
        }
    }
}

/// Characteristic permission bits
pub mod perms {
    /// Paired read
    pub const PAIRED_READ: u8 = 0x01;
    /// Paired write
    pub const PAIRED_WRITE: u8 = 0x02;
    /// Event notifications
    pub const EVENTS: u8 = 0x04;
    /// Hidden from users
    pub const HIDDEN: u8 = 0x08;

    /// The `perms` array in the JSON surface
    #[must_use]
    pub fn to_json_array(perms: u8) -> Vec<&'static str> {
        let mut out = Vec::new();
        if perms & PAIRED_READ != 0 {
            out.push("pr");
        }
        if perms & PAIRED_WRITE != 0 {
            out.push("pw");
        }
        if perms & EVENTS != 0 {
            out.push("ev");
        }
        if perms & HIDDEN != 0 {
            out.push("hd");
        }
        out
    }
}

/// A typed characteristic value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Unsigned integer (uint8..uint64)
    UInt(u64),
    /// Signed integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// Base64 payload (tlv8 and data formats)
    Data(String),
}

impl Value {
    /// Render as a JSON value
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => json!(b),
            Self::UInt(u) => json!(u),
            Self::Int(i) => json!(i),
            Self::Float(f) => json!(f),
            Self::Str(s) | Self::Data(s) => json!(s),
        }
    }

    /// Coerce a JSON value into `format`
    ///
    /// Booleans additionally accept 0/1, matching controller behavior.
    ///
    /// # Errors
    ///
    /// Returns [`status::INVALID_VALUE`] when the JSON value does not fit
    /// the format.
    pub fn from_json(format: Format, value: &serde_json::Value) -> Result<Self, i32> {
        match format {
            Format::Bool => match value {
                serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
                serde_json::Value::Number(n) => match n.as_u64() {
                    Some(0) => Ok(Self::Bool(false)),
                    Some(1) => Ok(Self::Bool(true)),
                    _ => Err(status::INVALID_VALUE),
                },
                _ => Err(status::INVALID_VALUE),
            },
            Format::UInt8 | Format::UInt16 | Format::UInt32 | Format::UInt64 => {
                let n = value.as_u64().ok_or(status::INVALID_VALUE)?;
                let max = match format {
                    Format::UInt8 => u64::from(u8::MAX),
                    Format::UInt16 => u64::from(u16::MAX),
                    Format::UInt32 => u64::from(u32::MAX),
                    _ => u64::MAX,
                };
                if n > max {
                    return Err(status::INVALID_VALUE);
                }
                Ok(Self::UInt(n))
            }
            Format::Int => {
                let n = value.as_i64().ok_or(status::INVALID_VALUE)?;
                if n < i64::from(i32::MIN) || n > i64::from(i32::MAX) {
                    return Err(status::INVALID_VALUE);
                }
                Ok(Self::Int(n))
            }
            Format::Float => value
                .as_f64()
                .map(Self::Float)
                .ok_or(status::INVALID_VALUE),
            Format::Str => value
                .as_str()
                .map(|s| Self::Str(s.to_string()))
                .ok_or(status::INVALID_VALUE),
            Format::Tlv8 | Format::Data => value
                .as_str()
                .map(|s| Self::Data(s.to_string()))
                .ok_or(status::INVALID_VALUE),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::UInt(u) => Some(*u as f64),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// One characteristic slot in a service
#[derive(Debug, Clone)]
pub struct Characteristic {
    /// Instance id, unique within the owning accessory
    pub iid: Iid,
    /// Short-form HAP type UUID, e.g. `"25"` for On
    pub type_id: String,
    /// Value format
    pub format: Format,
    /// Permission bits
    pub perms: u8,
    /// Current value
    pub value: Value,
    /// Minimum numeric value
    pub min_value: Option<f64>,
    /// Maximum numeric value
    pub max_value: Option<f64>,
    /// Numeric step
    pub min_step: Option<f64>,
    /// Unit name
    pub unit: Option<&'static str>,
    /// Maximum string length
    pub max_len: Option<u32>,
}

impl Characteristic {
    /// Create a characteristic; the instance id is assigned when the
    /// owning accessory joins a database
    #[must_use]
    pub fn new(type_id: &str, format: Format, perms: u8, value: Value) -> Self {
        Self {
            iid: 0,
            type_id: type_id.to_string(),
            format,
            perms,
            value,
            min_value: None,
            max_value: None,
            min_step: None,
            unit: None,
            max_len: None,
        }
    }

    /// Constrain to a numeric range with a step
    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self.min_step = Some(step);
        self
    }

    /// Attach a unit name
    #[must_use]
    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Whether paired controllers may read the value
    #[must_use]
    pub fn readable(&self) -> bool {
        self.perms & perms::PAIRED_READ != 0
    }

    /// Whether paired controllers may write the value
    #[must_use]
    pub fn writable(&self) -> bool {
        self.perms & perms::PAIRED_WRITE != 0
    }

    /// Whether the characteristic supports event notifications
    #[must_use]
    pub fn notifies(&self) -> bool {
        self.perms & perms::EVENTS != 0
    }

    /// Apply a JSON write to the value, enforcing format and bounds
    ///
    /// # Errors
    ///
    /// Returns a HAP status sub-code on type mismatch or range violation.
    pub fn write_value(&mut self, value: &serde_json::Value) -> Result<(), i32> {
        let new_value = Value::from_json(self.format, value)?;
        if let Some(n) = new_value.as_number() {
            if self.min_value.is_some_and(|min| n < min)
                || self.max_value.is_some_and(|max| n > max)
            {
                return Err(status::INVALID_VALUE);
            }
        }
        self.value = new_value;
        Ok(())
    }

    /// Append metadata fields (format bounds, unit, string cap) to a JSON
    /// characteristic object
    pub fn append_meta(&self, object: &mut serde_json::Map<String, serde_json::Value>) {
        object.insert("format".to_string(), json!(self.format.as_str()));
        if let Some(min) = self.min_value {
            object.insert("minValue".to_string(), json!(min));
        }
        if let Some(max) = self.max_value {
            object.insert("maxValue".to_string(), json!(max));
        }
        if let Some(step) = self.min_step {
            object.insert("minStep".to_string(), json!(step));
        }
        if let Some(unit) = self.unit {
            object.insert("unit".to_string(), json!(unit));
        }
        if let Some(max_len) = self.max_len {
            object.insert("maxLen".to_string(), json!(max_len));
        }
    }
}
