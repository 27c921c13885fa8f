//! Numeric coercion for dynamically typed field values
//!
//! Every helper returns `None` on failure; callers skip the field.

use crate::types::FieldValue;
use std::collections::BTreeMap;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Coerce to f64
///
/// Accepts floats, integers, numeric strings and booleans (1/0).
pub fn as_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Float(v) => Some(*v),
        FieldValue::Int(v) => Some(*v as f64),
        FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        FieldValue::Other(_) => None,
    }
}

/// Coerce to i64
///
/// Floats are truncated. Strings parse as an integer first, then as a float.
pub fn as_integer(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(v) => Some(*v),
        FieldValue::Float(v) => truncate(*v),
        FieldValue::Bool(b) => Some(i64::from(*b)),
        FieldValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        }
        FieldValue::Other(_) => None,
    }
}

/// Coerce to bool
///
/// Numbers are true when non-zero; strings accept `true`/`false` or a number.
pub fn as_boolean(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => as_number(value).map(|v| v != 0.0),
        },
        _ => as_number(value).map(|v| v != 0.0),
    }
}

fn truncate(v: f64) -> Option<i64> {
    // NaN and out-of-range floats are not integers
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

/// Look up a field and coerce to f64
pub fn number_field(fields: &BTreeMap<String, FieldValue>, key: &str) -> Option<f64> {
    fields.get(key).and_then(as_number)
}

/// Look up a field and coerce to i64
pub fn integer_field(fields: &BTreeMap<String, FieldValue>, key: &str) -> Option<i64> {
    fields.get(key).and_then(as_integer)
}

/// Look up a field and coerce to bool
pub fn boolean_field(fields: &BTreeMap<String, FieldValue>, key: &str) -> Option<bool> {
    fields.get(key).and_then(as_boolean)
}

/// Convert a MiB field to bytes, clamped at zero
pub fn mib_to_bytes(fields: &BTreeMap<String, FieldValue>, key: &str) -> Option<i64> {
    let mib = number_field(fields, key)?;
    let bytes = (mib * BYTES_PER_MIB) as i64;
    Some(bytes.max(0))
}

/// Probe a sample's fields for a temperature reading
///
/// Well-known keys are tried first, then any key containing "temp"
/// (case-insensitive) in sorted order.
pub fn extract_temperature(fields: &BTreeMap<String, FieldValue>) -> Option<f64> {
    const PREFERRED: [&str; 6] = ["temp_input", "temperature", "temp_c", "temp", "value", "current"];

    PREFERRED
        .iter()
        .find_map(|key| number_field(fields, key))
        .or_else(|| {
            fields
                .iter()
                .filter(|(key, _)| key.to_ascii_lowercase().contains("temp"))
                .find_map(|(_, value)| as_number(value))
        })
}
