//! Purpose: Tolerant scalar coercion for loosely typed request fields.
//! Exports: `display_string`, `coerce_u64`, `json_type_name`.
//! Role: Shared by context accessors and the binder's id resolution.
//! Invariants: Coercion never fails loudly; unusable input yields `None` or "".
//! Invariants: Integral floats coerce like integers; numeric strings must be exact integers.

use serde_json::{Number, Value};

/// Renders a field value as plain text.
///
/// Strings come back unquoted, numbers and booleans in their literal form,
/// arrays and objects as compact JSON. Absent and null values render as "".
pub fn display_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Number(number)) => number_text(number),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Reads an unsigned integer out of a number or a numeric string.
///
/// Negative values, fractions, and anything non-numeric yield `None`.
pub fn coerce_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => number_as_u64(number),
        Value::String(text) => text.parse::<u64>().ok(),
        _ => None,
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn number_as_u64(number: &Number) -> Option<u64> {
    if let Some(value) = number.as_u64() {
        return Some(value);
    }
    if number.is_i64() {
        return None;
    }
    let value = number.as_f64()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value < u64::MAX as f64 {
        Some(value as u64)
    } else {
        None
    }
}

fn number_text(number: &Number) -> String {
    if number.is_f64() {
        if let Some(value) = number.as_f64() {
            return format!("{value}");
        }
    }
    number.to_string()
}
