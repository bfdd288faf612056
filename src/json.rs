//! Lenient lookups over untyped JSON request and result bodies.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Reads `key` from `body` as `T`.
///
/// Absent keys and explicit `null` yield `default`. A value of the wrong type
/// also yields `default` and is reported as a warning instead of an error.
pub fn value_or_default<T>(body: &Value, key: &str, default: T) -> T
where
    T: DeserializeOwned,
{
    field_or_default(body.get(key), key, default)
}

/// Same as [`value_or_default`] for a field that was already looked up.
pub fn field_or_default<T>(field: Option<&Value>, key: &str, default: T) -> T
where
    T: DeserializeOwned,
{
    match field {
        None | Some(Value::Null) => default,
        Some(value) => match T::deserialize(value) {
            Ok(parsed) => parsed,
            Err(_) => {
                if let Some(parsed) = coerce_number(value).and_then(|n| T::deserialize(&n).ok()) {
                    return parsed;
                }
                warn!(
                    key,
                    expected = std::any::type_name::<T>(),
                    got = type_name(value),
                    "wrong type supplied for parameter, using default value"
                );
                default
            }
        },
    }
}

/// Integer view of a float or boolean: floats truncate, booleans become 0 or 1.
fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        Value::Number(n) if !n.is_i64() && !n.is_u64() => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| Value::from(f.trunc() as i64)),
        _ => None,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON truthiness as loosely-typed clients use it: `true` or a non-zero number.
pub(crate) fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}
