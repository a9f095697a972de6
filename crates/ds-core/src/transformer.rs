//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Read and write side value transformations, assertions and mappings."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! Read side: mask, shift, base, scale, offset.
//! Write side: minimum/maximum gate, offset, scale, base, shift.
//!
//! Mask and shift only touch integer types and operate on the two's
//! complement bit pattern at the native width, so they never overflow.
//! Scale and offset on integer types run in exact `i128` arithmetic when both
//! parameters are whole numbers and no base is set. Everything else evaluates
//! in `f64`. Either way the result is range checked against the original type.

use std::collections::BTreeMap;

use ds_common::{DsError, DsResult, ErrorKind};
use ds_models::{CommandValue, ResourceProperties, Value, ValueType};
use tracing::warn;

/// Relative tolerance when deciding whether an `f64` result is integral.
const INTEGRAL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i128),
    Float(f64),
}

/// Active (non-identity) transformation parameters of a resource.
#[derive(Debug, Default, Clone, Copy)]
struct Operators {
    mask: Option<u64>,
    shift: Option<i64>,
    base: Option<f64>,
    scale: Option<f64>,
    offset: Option<f64>,
}

impl Operators {
    fn of(props: &ResourceProperties) -> Self {
        Self {
            mask: props.mask.filter(|mask| *mask != 0),
            shift: props.shift.filter(|shift| *shift != 0),
            base: props.base.filter(|base| *base != 0.0),
            scale: props.scale.filter(|scale| *scale != 1.0),
            offset: props.offset.filter(|offset| *offset != 0.0),
        }
    }

    fn is_identity(&self) -> bool {
        self.mask.is_none()
            && self.shift.is_none()
            && self.base.is_none()
            && self.scale.is_none()
            && self.offset.is_none()
    }

    fn has_arithmetic(&self) -> bool {
        self.base.is_some() || self.scale.is_some() || self.offset.is_some()
    }

    /// Scale and offset as integers, when the exact integer path applies.
    fn integer_params(&self) -> Option<(i128, i128)> {
        if self.base.is_some() {
            return None;
        }
        let scale = match self.scale {
            Some(scale) => integral(scale)?,
            None => 1,
        };
        let offset = match self.offset {
            Some(offset) => integral(offset)?,
            None => 0,
        };
        Some((scale, offset))
    }
}

/// Apply the read-side pipeline.
///
/// Fails with `NaNError` for NaN floats and `OverflowError` when the result
/// does not fit the resource type. Null and non-numeric values pass through.
pub fn transform_read(value: &CommandValue, props: &ResourceProperties) -> DsResult<CommandValue> {
    if value.is_null() || !value.is_numeric() {
        return Ok(value.clone());
    }
    let value_type = value.value_type();
    let number = number_of(value.value())
        .ok_or_else(|| DsError::server(format!("{} is not numeric", value.device_resource_name)))?;
    if let Number::Float(f) = number {
        if f.is_nan() {
            return Err(DsError::new(
                ErrorKind::NaNError,
                format!("{} is NaN", value.device_resource_name),
            ));
        }
    }
    let ops = Operators::of(props);
    if ops.is_identity() {
        return Ok(value.clone());
    }

    let mut number = number;
    if let (Number::Int(bits), Some((width, signed))) = (number, value_type.integer_bits()) {
        let mut pattern = to_pattern(bits, width);
        if let Some(mask) = ops.mask {
            pattern &= mask;
        }
        if let Some(shift) = ops.shift {
            pattern = logical_shift(pattern, shift, width);
        }
        number = Number::Int(from_pattern(pattern, width, signed));
    }

    if ops.has_arithmetic() {
        number = match (number, value_type.integer_bits(), ops.integer_params()) {
            (Number::Int(n), Some((width, signed)), Some((scale, offset))) => {
                let exact = n.checked_mul(scale).and_then(|v| v.checked_add(offset));
                fit_int(exact, width, signed, value_type, &value.device_resource_name)?
            }
            _ => {
                let mut v = as_f64(number);
                if let Some(base) = ops.base {
                    v = base.powf(v);
                }
                if let Some(scale) = ops.scale {
                    v *= scale;
                }
                if let Some(offset) = ops.offset {
                    v += offset;
                }
                fit(value_type, v, &value.device_resource_name)?
            }
        };
    }

    rebuild(value, value_type, number)
}

/// Apply the write-side pipeline, gating on minimum and maximum first.
pub fn transform_write(value: &CommandValue, props: &ResourceProperties) -> DsResult<CommandValue> {
    if value.is_null() || !value.is_numeric() {
        return Ok(value.clone());
    }
    let value_type = value.value_type();
    let name = &value.device_resource_name;
    let number = number_of(value.value())
        .ok_or_else(|| DsError::server(format!("{name} is not numeric")))?;

    check_range(value, props)?;

    let ops = Operators::of(props);
    if ops.is_identity() {
        return Ok(value.clone());
    }

    let mut number = number;
    if ops.has_arithmetic() {
        number = match (number, value_type.integer_bits(), ops.integer_params()) {
            (Number::Int(n), Some((width, signed)), Some((scale, offset))) => {
                // A remainder means the raw value is not a whole number.
                let exact = n
                    .checked_sub(offset)
                    .filter(|v| v.checked_rem(scale) == Some(0))
                    .and_then(|v| v.checked_div(scale));
                fit_int(exact, width, signed, value_type, name)?
            }
            _ => {
                let mut v = as_f64(number);
                if let Some(offset) = ops.offset {
                    v -= offset;
                }
                if let Some(scale) = ops.scale {
                    v /= scale;
                }
                if let Some(base) = ops.base {
                    v = v.ln() / base.ln();
                }
                fit(value_type, v, name)?
            }
        };
    }

    if let (Number::Int(bits), Some((width, signed)), Some(shift)) =
        (number, value_type.integer_bits(), ops.shift)
    {
        let pattern = logical_shift(to_pattern(bits, width), -shift, width);
        number = Number::Int(from_pattern(pattern, width, signed));
    }

    rebuild(value, value_type, number)
}

/// Reject numeric values outside the resource's minimum and maximum.
///
/// Runs before any write-side transformation, and also when transformations
/// are disabled.
pub fn check_range(value: &CommandValue, props: &ResourceProperties) -> DsResult<()> {
    if props.minimum.is_none() && props.maximum.is_none() {
        return Ok(());
    }
    let Some(number) = number_of(value.value()) else {
        return Ok(());
    };
    let name = &value.device_resource_name;
    let v = as_f64(number);
    if let Some(minimum) = props.minimum {
        if v < minimum {
            return Err(DsError::contract_invalid(format!(
                "{name} value {v} is below the minimum {minimum}"
            )));
        }
    }
    if let Some(maximum) = props.maximum {
        if v > maximum {
            return Err(DsError::contract_invalid(format!(
                "{name} value {v} is above the maximum {maximum}"
            )));
        }
    }
    Ok(())
}

/// Fail with `ServerError` when `assertion` is set and the value's text differs.
pub fn check_assertion(value: &CommandValue, assertion: &str) -> DsResult<()> {
    if assertion.is_empty() || value.is_null() {
        return Ok(());
    }
    let actual = value.to_string();
    if actual != assertion {
        return Err(DsError::server(format!(
            "assertion ({assertion}) failed with value: {actual}"
        )));
    }
    Ok(())
}

/// Replace the value by the mapped string when its text is a key of `mappings`.
///
/// `resource_type` is the type the resource declares. A string value on a
/// non-string resource has already been mapped and is returned unchanged, so
/// mapping twice is the same as mapping once. Raw string values are always
/// looked up, even when they equal some mapping target.
pub fn map_value(
    value: CommandValue,
    resource_type: ValueType,
    mappings: &BTreeMap<String, String>,
) -> CommandValue {
    if mappings.is_empty() || value.is_null() {
        return value;
    }
    if value.value_type() == ValueType::String && resource_type != ValueType::String {
        return value;
    }
    let key = value.to_string();
    match mappings.get(&key) {
        Some(mapped) => {
            let mut result = CommandValue::string(value.device_resource_name.clone(), mapped.clone())
                .with_origin(value.origin);
            result.tags = value.tags;
            result
        }
        None => {
            warn!(resource = %value.device_resource_name, value = %key, "no mapping for value");
            value
        }
    }
}

/// Write-side mapping on the raw request text.
pub fn map_write_parameter<'a>(
    resource: &str,
    text: &'a str,
    mappings: &'a BTreeMap<String, String>,
) -> &'a str {
    if mappings.is_empty() {
        return text;
    }
    match mappings.get(text) {
        Some(mapped) => mapped.as_str(),
        None => {
            warn!(resource = %resource, value = %text, "no mapping for write parameter");
            text
        }
    }
}

fn number_of(value: &Value) -> Option<Number> {
    let number = match value {
        Value::Uint8(v) => Number::Int(i128::from(*v)),
        Value::Uint16(v) => Number::Int(i128::from(*v)),
        Value::Uint32(v) => Number::Int(i128::from(*v)),
        Value::Uint64(v) => Number::Int(i128::from(*v)),
        Value::Int8(v) => Number::Int(i128::from(*v)),
        Value::Int16(v) => Number::Int(i128::from(*v)),
        Value::Int32(v) => Number::Int(i128::from(*v)),
        Value::Int64(v) => Number::Int(i128::from(*v)),
        Value::Float32(v) => Number::Float(f64::from(*v)),
        Value::Float64(v) => Number::Float(*v),
        _ => return None,
    };
    Some(number)
}

fn as_f64(number: Number) -> f64 {
    match number {
        Number::Int(v) => v as f64,
        Number::Float(v) => v,
    }
}

fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn to_pattern(value: i128, width: u32) -> u64 {
    (value as u64) & width_mask(width)
}

fn from_pattern(pattern: u64, width: u32, signed: bool) -> i128 {
    let pattern = pattern & width_mask(width);
    if signed && (pattern >> (width - 1)) & 1 == 1 {
        i128::from(pattern) - (1i128 << width)
    } else {
        i128::from(pattern)
    }
}

fn logical_shift(pattern: u64, shift: i64, width: u32) -> u64 {
    let amount = shift.unsigned_abs();
    if amount >= u64::from(width) {
        return 0;
    }
    let shifted = if shift > 0 {
        pattern << amount
    } else {
        pattern >> amount
    };
    shifted & width_mask(width)
}

/// Whole-number parameters within `i64` range, as `i128`.
fn integral(p: f64) -> Option<i128> {
    if p.fract() != 0.0 || p.abs() > i64::MAX as f64 {
        return None;
    }
    Some(p as i128)
}

fn int_bounds(width: u32, signed: bool) -> (i128, i128) {
    if signed {
        (-(1i128 << (width - 1)), (1i128 << (width - 1)) - 1)
    } else {
        (0, (1i128 << width) - 1)
    }
}

/// Range check an exact integer result. `None` means the arithmetic itself overflowed.
fn fit_int(
    n: Option<i128>,
    width: u32,
    signed: bool,
    value_type: ValueType,
    name: &str,
) -> DsResult<Number> {
    let (min, max) = int_bounds(width, signed);
    match n {
        Some(n) if n >= min && n <= max => Ok(Number::Int(n)),
        Some(n) => Err(DsError::new(
            ErrorKind::OverflowError,
            format!("{name} result {n} overflows {value_type}"),
        )),
        None => Err(DsError::new(
            ErrorKind::OverflowError,
            format!("{name} result overflows {value_type}"),
        )),
    }
}

/// Range check an `f64` result against `value_type`.
fn fit(value_type: ValueType, v: f64, name: &str) -> DsResult<Number> {
    let overflow = || {
        DsError::new(
            ErrorKind::OverflowError,
            format!("{name} result {v} overflows {value_type}"),
        )
    };
    if v.is_nan() {
        return Err(DsError::new(
            ErrorKind::NaNError,
            format!("{name} transformation produced NaN"),
        ));
    }
    if !v.is_finite() {
        return Err(overflow());
    }
    match value_type.integer_bits() {
        Some((width, signed)) => {
            let rounded = v.round();
            if (v - rounded).abs() > INTEGRAL_TOLERANCE * rounded.abs().max(1.0) {
                return Err(overflow());
            }
            let (min, max) = int_bounds(width, signed);
            // `as` saturates, so values beyond i128 land outside the bounds.
            let n = rounded as i128;
            if n < min || n > max {
                return Err(overflow());
            }
            Ok(Number::Int(n))
        }
        None if value_type == ValueType::Float32 => {
            if v.abs() > f64::from(f32::MAX) {
                return Err(overflow());
            }
            Ok(Number::Float(v))
        }
        None => Ok(Number::Float(v)),
    }
}

fn rebuild(original: &CommandValue, value_type: ValueType, number: Number) -> DsResult<CommandValue> {
    let out_of_range = || {
        DsError::new(
            ErrorKind::OverflowError,
            format!("{} overflows {value_type}", original.device_resource_name),
        )
    };
    let value = match (value_type, number) {
        (ValueType::Uint8, Number::Int(n)) => Value::Uint8(u8::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Uint16, Number::Int(n)) => Value::Uint16(u16::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Uint32, Number::Int(n)) => Value::Uint32(u32::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Uint64, Number::Int(n)) => Value::Uint64(u64::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Int8, Number::Int(n)) => Value::Int8(i8::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Int16, Number::Int(n)) => Value::Int16(i16::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Int32, Number::Int(n)) => Value::Int32(i32::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Int64, Number::Int(n)) => Value::Int64(i64::try_from(n).map_err(|_| out_of_range())?),
        (ValueType::Float32, Number::Float(f)) => Value::Float32(f as f32),
        (ValueType::Float64, Number::Float(f)) => Value::Float64(f),
        _ => {
            return Err(DsError::server(format!(
                "cannot store transformed value in {value_type}"
            )))
        }
    };
    original.clone().with_value(value)
}
