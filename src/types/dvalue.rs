//! Data value representing a required flag value

use crate::types::Value;

/// A required value for a flag layer.
/// This is an alias of the Number type from serde_json, which is an enum that can represent
/// integers and floating point numbers.
/// The number type is an enum over i64, u64 and f64, with the additional constraint that floating
/// point numbers must be finite (not positive or negative infinity or NaN).
pub type DValue = serde_json::Number;

/// Returns whether a layer value equals a required [DValue].
///
/// Integers are compared exactly where both sides are integral, otherwise the comparison falls
/// back to f64. Non-numeric values never match.
///
/// # Arguments
///
/// * `required`: Required flag value
/// * `value`: Value read from the flag layer
pub fn matches(required: &DValue, value: &Value) -> bool {
    match value {
        Value::Int(v) => match required.as_i64() {
            Some(r) => r == *v,
            None => required.as_f64() == Some(*v as f64),
        },
        Value::UInt(v) => match required.as_u64() {
            Some(r) => r == *v,
            None => required.as_f64() == Some(*v as f64),
        },
        Value::Float(v) => required.as_f64() == Some(*v),
        Value::Text(_) | Value::List(_) => false,
    }
}
