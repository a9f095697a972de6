//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Typed command value exchanged between drivers and the engine."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use ds_common::{DsError, DsResult, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::{Display, EnumString};

/// Largest binary payload a single value may carry (16 MiB).
pub const MAX_BINARY_BYTES: usize = 16 * 1024 * 1024;

/// Number of leading bytes rendered when formatting a binary value.
const BINARY_PREVIEW_BYTES: usize = 20;

/// Closed set of value types understood by profiles, drivers and readings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
#[allow(missing_docs)]
pub enum ValueType {
    Bool,
    String,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    BoolArray,
    StringArray,
    Uint8Array,
    Uint16Array,
    Uint32Array,
    Uint64Array,
    Int8Array,
    Int16Array,
    Int32Array,
    Int64Array,
    Float32Array,
    Float64Array,
    Binary,
    Object,
    ObjectArray,
}

impl ValueType {
    /// Scalar integer or float type.
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Scalar integer type of any width or signedness.
    pub fn is_integer(self) -> bool {
        self.integer_bits().is_some()
    }

    /// Scalar floating point type.
    pub fn is_float(self) -> bool {
        matches!(self, ValueType::Float32 | ValueType::Float64)
    }

    /// Homogeneous array type (object arrays included).
    pub fn is_array(self) -> bool {
        self.element_type().is_some()
    }

    /// Element type of an array type, `None` for scalars.
    pub fn element_type(self) -> Option<ValueType> {
        let element = match self {
            ValueType::BoolArray => ValueType::Bool,
            ValueType::StringArray => ValueType::String,
            ValueType::Uint8Array => ValueType::Uint8,
            ValueType::Uint16Array => ValueType::Uint16,
            ValueType::Uint32Array => ValueType::Uint32,
            ValueType::Uint64Array => ValueType::Uint64,
            ValueType::Int8Array => ValueType::Int8,
            ValueType::Int16Array => ValueType::Int16,
            ValueType::Int32Array => ValueType::Int32,
            ValueType::Int64Array => ValueType::Int64,
            ValueType::Float32Array => ValueType::Float32,
            ValueType::Float64Array => ValueType::Float64,
            ValueType::ObjectArray => ValueType::Object,
            _ => return None,
        };
        Some(element)
    }

    /// Bit width and signedness of scalar integer types.
    pub fn integer_bits(self) -> Option<(u32, bool)> {
        match self {
            ValueType::Uint8 => Some((8, false)),
            ValueType::Uint16 => Some((16, false)),
            ValueType::Uint32 => Some((32, false)),
            ValueType::Uint64 => Some((64, false)),
            ValueType::Int8 => Some((8, true)),
            ValueType::Int16 => Some((16, true)),
            ValueType::Int32 => Some((32, true)),
            ValueType::Int64 => Some((64, true)),
            _ => None,
        }
    }
}

/// Concrete payload of a [`CommandValue`]. `Null` marks an absent reading.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Value {
    Null,
    Bool(bool),
    String(String),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    BoolArray(Vec<bool>),
    StringArray(Vec<String>),
    Uint8Array(Vec<u8>),
    Uint16Array(Vec<u16>),
    Uint32Array(Vec<u32>),
    Uint64Array(Vec<u64>),
    Int8Array(Vec<i8>),
    Int16Array(Vec<i16>),
    Int32Array(Vec<i32>),
    Int64Array(Vec<i64>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>),
    Binary(Vec<u8>),
    Object(JsonValue),
    ObjectArray(Vec<JsonValue>),
}

impl Value {
    /// Type carried by the payload; `None` for [`Value::Null`].
    pub fn value_type(&self) -> Option<ValueType> {
        let vt = match self {
            Value::Null => return None,
            Value::Bool(_) => ValueType::Bool,
            Value::String(_) => ValueType::String,
            Value::Uint8(_) => ValueType::Uint8,
            Value::Uint16(_) => ValueType::Uint16,
            Value::Uint32(_) => ValueType::Uint32,
            Value::Uint64(_) => ValueType::Uint64,
            Value::Int8(_) => ValueType::Int8,
            Value::Int16(_) => ValueType::Int16,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::BoolArray(_) => ValueType::BoolArray,
            Value::StringArray(_) => ValueType::StringArray,
            Value::Uint8Array(_) => ValueType::Uint8Array,
            Value::Uint16Array(_) => ValueType::Uint16Array,
            Value::Uint32Array(_) => ValueType::Uint32Array,
            Value::Uint64Array(_) => ValueType::Uint64Array,
            Value::Int8Array(_) => ValueType::Int8Array,
            Value::Int16Array(_) => ValueType::Int16Array,
            Value::Int32Array(_) => ValueType::Int32Array,
            Value::Int64Array(_) => ValueType::Int64Array,
            Value::Float32Array(_) => ValueType::Float32Array,
            Value::Float64Array(_) => ValueType::Float64Array,
            Value::Binary(_) => ValueType::Binary,
            Value::Object(_) => ValueType::Object,
            Value::ObjectArray(_) => ValueType::ObjectArray,
        };
        Some(vt)
    }

    /// Parse a JSON document into a payload of the requested type.
    ///
    /// Integers must fit the target width; binary accepts either a byte array
    /// or a base64 string. JSON `null` yields [`Value::Null`].
    pub fn from_json(value_type: ValueType, json: &JsonValue) -> DsResult<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || {
            DsError::contract_invalid(format!("cannot interpret {json} as {value_type}"))
        };
        let value = match value_type {
            ValueType::Bool => Value::Bool(json.as_bool().ok_or_else(mismatch)?),
            ValueType::String => Value::String(json.as_str().ok_or_else(mismatch)?.to_owned()),
            ValueType::Uint8 => Value::Uint8(json_int(json).ok_or_else(mismatch)?),
            ValueType::Uint16 => Value::Uint16(json_int(json).ok_or_else(mismatch)?),
            ValueType::Uint32 => Value::Uint32(json_int(json).ok_or_else(mismatch)?),
            ValueType::Uint64 => Value::Uint64(json_int(json).ok_or_else(mismatch)?),
            ValueType::Int8 => Value::Int8(json_int(json).ok_or_else(mismatch)?),
            ValueType::Int16 => Value::Int16(json_int(json).ok_or_else(mismatch)?),
            ValueType::Int32 => Value::Int32(json_int(json).ok_or_else(mismatch)?),
            ValueType::Int64 => Value::Int64(json_int(json).ok_or_else(mismatch)?),
            ValueType::Float32 => Value::Float32(json_f32(json).ok_or_else(mismatch)?),
            ValueType::Float64 => Value::Float64(json.as_f64().ok_or_else(mismatch)?),
            ValueType::BoolArray => Value::BoolArray(json_array(json, JsonValue::as_bool)?),
            ValueType::StringArray => Value::StringArray(json_array(json, |item| {
                item.as_str().map(str::to_owned)
            })?),
            ValueType::Uint8Array => Value::Uint8Array(json_array(json, json_int)?),
            ValueType::Uint16Array => Value::Uint16Array(json_array(json, json_int)?),
            ValueType::Uint32Array => Value::Uint32Array(json_array(json, json_int)?),
            ValueType::Uint64Array => Value::Uint64Array(json_array(json, json_int)?),
            ValueType::Int8Array => Value::Int8Array(json_array(json, json_int)?),
            ValueType::Int16Array => Value::Int16Array(json_array(json, json_int)?),
            ValueType::Int32Array => Value::Int32Array(json_array(json, json_int)?),
            ValueType::Int64Array => Value::Int64Array(json_array(json, json_int)?),
            ValueType::Float32Array => Value::Float32Array(json_array(json, json_f32)?),
            ValueType::Float64Array => Value::Float64Array(json_array(json, JsonValue::as_f64)?),
            ValueType::Binary => match json {
                JsonValue::String(encoded) => Value::Binary(
                    base64::engine::general_purpose::STANDARD
                        .decode(encoded)
                        .map_err(|err| DsError::wrap(ErrorKind::ContractInvalid, "invalid base64 binary", err))?,
                ),
                _ => Value::Binary(json_array(json, json_int)?),
            },
            ValueType::Object => Value::Object(json.clone()),
            ValueType::ObjectArray => Value::ObjectArray(
                json.as_array().ok_or_else(mismatch)?.clone(),
            ),
        };
        Ok(value)
    }

    /// Parse the textual form used by write requests and profile defaults.
    ///
    /// Scalars are parsed directly; arrays, objects and binary expect JSON.
    pub fn parse(value_type: ValueType, text: &str) -> DsResult<Value> {
        let invalid = |err: &dyn fmt::Display| {
            DsError::contract_invalid(format!("cannot parse '{text}' as {value_type}: {err}"))
        };
        let trimmed = text.trim();
        let value = match value_type {
            ValueType::String => Value::String(text.to_owned()),
            ValueType::Bool => Value::Bool(parse_bool(trimmed).ok_or_else(|| invalid(&"not a boolean"))?),
            ValueType::Uint8 => Value::Uint8(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Uint16 => Value::Uint16(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Uint32 => Value::Uint32(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Uint64 => Value::Uint64(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Int8 => Value::Int8(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Int16 => Value::Int16(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Int32 => Value::Int32(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Int64 => Value::Int64(trimmed.parse().map_err(|e| invalid(&e))?),
            ValueType::Float32 => match trimmed.parse() {
                Ok(v) => Value::Float32(v),
                Err(err) => {
                    let bytes: [u8; 4] = decode_float_bytes(trimmed).ok_or_else(|| invalid(&err))?;
                    Value::Float32(f32::from_be_bytes(bytes))
                }
            },
            ValueType::Float64 => match trimmed.parse() {
                Ok(v) => Value::Float64(v),
                Err(err) => {
                    let bytes: [u8; 8] = decode_float_bytes(trimmed).ok_or_else(|| invalid(&err))?;
                    Value::Float64(f64::from_be_bytes(bytes))
                }
            },
            ValueType::Binary => {
                // Raw text is treated as base64 unless it looks like a JSON array.
                let json = if trimmed.starts_with('[') {
                    serde_json::from_str(trimmed).map_err(|e| invalid(&e))?
                } else {
                    JsonValue::String(trimmed.to_owned())
                };
                Value::from_json(value_type, &json)?
            }
            _ => {
                let json: JsonValue = serde_json::from_str(trimmed).map_err(|e| invalid(&e))?;
                Value::from_json(value_type, &json)?
            }
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Uint8(v) => write!(f, "{v}"),
            Value::Uint16(v) => write!(f, "{v}"),
            Value::Uint32(v) => write!(f, "{v}"),
            Value::Uint64(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => f.write_str(&format_f32(*v)),
            Value::Float64(v) => f.write_str(&format_f64(*v)),
            Value::BoolArray(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::StringArray(v) => write_list(f, v.iter().map(|s| JsonValue::from(s.as_str()).to_string())),
            Value::Uint8Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Uint16Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Uint32Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Uint64Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Int8Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Int16Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Int32Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Int64Array(v) => write_list(f, v.iter().map(ToString::to_string)),
            Value::Float32Array(v) => write_list(f, v.iter().map(|x| format_f32(*x))),
            Value::Float64Array(v) => write_list(f, v.iter().map(|x| format_f64(*x))),
            Value::Binary(bytes) => {
                let shown = bytes.len().min(BINARY_PREVIEW_BYTES);
                write!(f, "Binary: 0x{}", hex::encode(&bytes[..shown]))?;
                if bytes.len() > shown {
                    f.write_str("...")?;
                }
                write!(f, " ({} bytes)", bytes.len())
            }
            Value::Object(v) => write!(f, "{v}"),
            Value::ObjectArray(v) => write!(f, "{}", JsonValue::Array(v.clone())),
        }
    }
}

/// A single typed value produced by a driver read or consumed by a driver write.
///
/// The payload always matches `value_type` (or is null); construction enforces
/// that, so the type and payload are only reachable through accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandValue {
    /// Resource the value belongs to.
    pub device_resource_name: String,
    value_type: ValueType,
    value: Value,
    /// Origin timestamp in nanoseconds; zero when the driver left it unset.
    pub origin: i64,
    /// Free-form tags propagated onto the resulting reading.
    pub tags: BTreeMap<String, String>,
}

impl CommandValue {
    /// Build a value, rejecting payloads that do not match `value_type`.
    pub fn new(
        device_resource_name: impl Into<String>,
        value_type: ValueType,
        value: Value,
    ) -> DsResult<Self> {
        check_payload(value_type, &value)?;
        Ok(Self {
            device_resource_name: device_resource_name.into(),
            value_type,
            value,
            origin: 0,
            tags: BTreeMap::new(),
        })
    }

    /// Absent value of the given type.
    pub fn null(device_resource_name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            device_resource_name: device_resource_name.into(),
            value_type,
            value: Value::Null,
            origin: 0,
            tags: BTreeMap::new(),
        }
    }

    /// Plain string value, used for synthetic readings.
    pub fn string(device_resource_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            device_resource_name: device_resource_name.into(),
            value_type: ValueType::String,
            value: Value::String(text.into()),
            origin: 0,
            tags: BTreeMap::new(),
        }
    }

    /// Build a value from JSON, converting into the requested type.
    pub fn from_json(
        device_resource_name: impl Into<String>,
        value_type: ValueType,
        json: &JsonValue,
    ) -> DsResult<Self> {
        let value = Value::from_json(value_type, json)?;
        Self::new(device_resource_name, value_type, value)
    }

    /// Builder-style origin setter.
    pub fn with_origin(mut self, origin: i64) -> Self {
        self.origin = origin;
        self
    }

    /// Replace the payload, keeping name, origin and tags. The type follows
    /// the new payload; a null payload keeps the current type.
    pub fn with_value(self, value: Value) -> DsResult<Self> {
        let value_type = value.value_type().unwrap_or(self.value_type);
        check_payload(value_type, &value)?;
        Ok(Self {
            value_type,
            value,
            ..self
        })
    }

    /// Declared type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Borrow the payload.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume into the payload.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// True when the value carries no payload.
    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    /// True for scalar integer and float types.
    pub fn is_numeric(&self) -> bool {
        self.value_type.is_numeric()
    }

    fn mismatch(&self, wanted: ValueType) -> DsError {
        DsError::server(format!(
            "value of {} is {}, not {wanted}",
            self.device_resource_name, self.value_type
        ))
    }
}

macro_rules! scalar_accessor {
    ($($fn_name:ident => $variant:ident: $ty:ty),* $(,)?) => {
        impl CommandValue {
            $(
                #[doc = concat!("Payload as `", stringify!($ty), "`; fails for any other type or null.")]
                pub fn $fn_name(&self) -> DsResult<$ty> {
                    match &self.value {
                        Value::$variant(v) => Ok(*v),
                        _ => Err(self.mismatch(ValueType::$variant)),
                    }
                }
            )*
        }
    };
}

macro_rules! slice_accessor {
    ($($fn_name:ident => $variant:ident: $ty:ty),* $(,)?) => {
        impl CommandValue {
            $(
                #[doc = concat!("Borrow the payload as `&", stringify!($ty), "`; fails for any other type or null.")]
                pub fn $fn_name(&self) -> DsResult<&$ty> {
                    match &self.value {
                        Value::$variant(v) => Ok(v),
                        _ => Err(self.mismatch(ValueType::$variant)),
                    }
                }
            )*
        }
    };
}

scalar_accessor! {
    as_bool => Bool: bool,
    as_u8 => Uint8: u8,
    as_u16 => Uint16: u16,
    as_u32 => Uint32: u32,
    as_u64 => Uint64: u64,
    as_i8 => Int8: i8,
    as_i16 => Int16: i16,
    as_i32 => Int32: i32,
    as_i64 => Int64: i64,
    as_f32 => Float32: f32,
    as_f64 => Float64: f64,
}

slice_accessor! {
    as_str => String: str,
    as_bool_array => BoolArray: [bool],
    as_string_array => StringArray: [String],
    as_u8_array => Uint8Array: [u8],
    as_u16_array => Uint16Array: [u16],
    as_u32_array => Uint32Array: [u32],
    as_u64_array => Uint64Array: [u64],
    as_i8_array => Int8Array: [i8],
    as_i16_array => Int16Array: [i16],
    as_i32_array => Int32Array: [i32],
    as_i64_array => Int64Array: [i64],
    as_f32_array => Float32Array: [f32],
    as_f64_array => Float64Array: [f64],
    as_binary => Binary: [u8],
    as_object => Object: JsonValue,
    as_object_array => ObjectArray: [JsonValue],
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

fn check_payload(value_type: ValueType, value: &Value) -> DsResult<()> {
    let Some(actual) = value.value_type() else {
        return Ok(());
    };
    if actual != value_type {
        return Err(DsError::server(format!(
            "payload of type {actual} does not match declared type {value_type}"
        )));
    }
    if let Value::Binary(bytes) = value {
        if bytes.len() > MAX_BINARY_BYTES {
            return Err(DsError::server(format!(
                "binary payload of {} bytes exceeds the {MAX_BINARY_BYTES} byte limit",
                bytes.len()
            )));
        }
    }
    Ok(())
}

fn json_int<T>(json: &JsonValue) -> Option<T>
where
    T: TryFrom<u64> + TryFrom<i64>,
{
    if let Some(unsigned) = json.as_u64() {
        T::try_from(unsigned).ok()
    } else {
        json.as_i64().and_then(|signed| T::try_from(signed).ok())
    }
}

fn json_f32(json: &JsonValue) -> Option<f32> {
    let wide = json.as_f64()?;
    if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
        return None;
    }
    Some(wide as f32)
}

fn json_array<T>(json: &JsonValue, item: impl Fn(&JsonValue) -> Option<T>) -> DsResult<Vec<T>> {
    let items = json
        .as_array()
        .ok_or_else(|| DsError::contract_invalid(format!("expected a JSON array, got {json}")))?;
    items
        .iter()
        .map(|element| {
            item(element).ok_or_else(|| {
                DsError::contract_invalid(format!("array element {element} has the wrong type"))
            })
        })
        .collect()
}

/// Base64 text carrying exactly `N` big-endian IEEE-754 bytes.
fn decode_float_bytes<const N: usize>(text: &str) -> Option<[u8; N]> {
    let raw = base64::engine::general_purpose::STANDARD.decode(text).ok()?;
    raw.try_into().ok()
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "t" => Some(true),
        "false" | "0" | "f" => Some(false),
        _ => None,
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: impl Iterator<Item = String>) -> fmt::Result {
    f.write_str("[")?;
    for (idx, item) in items.enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&item)?;
    }
    f.write_str("]")
}

fn format_f32(value: f32) -> String {
    exponent_form(format!("{value:e}"))
}

fn format_f64(value: f64) -> String {
    exponent_form(format!("{value:e}"))
}

/// Shortest round-trip mantissa with a signed two digit exponent, e.g. `2.3e+01`.
fn exponent_form(raw: String) -> String {
    match raw.as_str() {
        "NaN" => return "NaN".to_owned(),
        "inf" => return "+Inf".to_owned(),
        "-inf" => return "-Inf".to_owned(),
        _ => {}
    }
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn construction_rejects_mismatched_payload() {
        let err = CommandValue::new("temp", ValueType::Int16, Value::Float32(1.0)).unwrap_err();
        assert!(err.is(ErrorKind::ServerError));
        let ok = CommandValue::new("temp", ValueType::Int16, Value::Int16(230)).unwrap();
        assert_eq!(ok.as_i16().unwrap(), 230);
        assert!(ok.as_i32().is_err());
    }

    #[test]
    fn oversized_binary_is_rejected() {
        let payload = vec![0u8; MAX_BINARY_BYTES + 1];
        assert!(CommandValue::new("blob", ValueType::Binary, Value::Binary(payload)).is_err());
    }

    #[test]
    fn floats_render_in_exponent_form() {
        assert_eq!(Value::Float32(23.0).to_string(), "2.3e+01");
        assert_eq!(Value::Float64(0.0).to_string(), "0e+00");
        assert_eq!(Value::Float64(-0.000125).to_string(), "-1.25e-04");
        assert_eq!(Value::Float64(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Float64(f64::INFINITY).to_string(), "+Inf");
    }

    #[test]
    fn arrays_and_binary_render_compactly() {
        assert_eq!(Value::Int8Array(vec![1, -2]).to_string(), "[1, -2]");
        assert_eq!(
            Value::StringArray(vec!["a".into(), "b c".into()]).to_string(),
            r#"["a", "b c"]"#
        );
        let rendered = Value::Binary((0u8..32).collect()).to_string();
        assert!(rendered.starts_with("Binary: 0x000102"));
        assert!(rendered.ends_with("... (32 bytes)"));
    }

    #[test]
    fn json_conversion_checks_integer_width() {
        assert!(Value::from_json(ValueType::Uint8, &json!(300)).is_err());
        assert_eq!(
            Value::from_json(ValueType::Int8Array, &json!([1, -1])).unwrap(),
            Value::Int8Array(vec![1, -1])
        );
        assert_eq!(
            Value::from_json(ValueType::Binary, &json!("AQID")).unwrap(),
            Value::Binary(vec![1, 2, 3])
        );
        assert_eq!(Value::from_json(ValueType::Bool, &json!(null)).unwrap(), Value::Null);
    }

    #[test]
    fn text_parsing_covers_scalars_and_arrays() {
        assert_eq!(Value::parse(ValueType::Bool, "TRUE").unwrap(), Value::Bool(true));
        assert_eq!(Value::parse(ValueType::Float32, "1.5").unwrap(), Value::Float32(1.5));
        assert_eq!(
            Value::parse(ValueType::Uint16Array, "[1,2]").unwrap(),
            Value::Uint16Array(vec![1, 2])
        );
        assert!(Value::parse(ValueType::Int16, "abc").is_err());
        // 1.5f32 big-endian is 3f c0 00 00
        assert_eq!(Value::parse(ValueType::Float32, "P8AAAA==").unwrap(), Value::Float32(1.5));
    }

    #[test]
    fn with_value_follows_new_type_and_keeps_metadata() {
        let mut value = CommandValue::new("t", ValueType::Float32, Value::Float32(1.0))
            .unwrap()
            .with_origin(42);
        value.tags.insert("k".into(), "v".into());
        let replaced = value.with_value(Value::String("overflow".into())).unwrap();
        assert_eq!(replaced.value_type(), ValueType::String);
        assert_eq!(replaced.origin, 42);
        assert_eq!(replaced.tags["k"], "v");
    }

    #[test]
    fn value_type_parses_case_insensitively() {
        assert_eq!("float32".parse::<ValueType>().unwrap(), ValueType::Float32);
        assert_eq!(ValueType::Uint16Array.element_type(), Some(ValueType::Uint16));
        assert!(!ValueType::Binary.is_numeric());
    }
}
