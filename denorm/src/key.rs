//! Join keys and foreign key values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{Number, Value};

use crate::bail;
use crate::document::get_path;
use crate::error::{ErrorKind, MergeResult};

/// A document value used to look up children.
///
/// Keys are totally ordered across types: null, numbers, strings, objects, arrays and finally
/// booleans. Numbers compare by value, so `1` and `1.0` are the same key.
#[derive(Debug, Clone)]
pub struct JoinKey(Value);

impl JoinKey {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for JoinKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for JoinKey {
    fn eq(&self, other: &Self) -> bool {
        compare_values(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for JoinKey {}

impl PartialOrd for JoinKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JoinKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

impl Hash for JoinKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

/// Numeric value normalized so that integral floats and integers compare equal.
#[derive(Debug, Clone, Copy)]
enum NumberKey {
    Int(i128),
    Float(f64),
}

// Integral floats beyond this bound are kept as floats.
const I128_FLOAT_BOUND: f64 = 1.0e38;

fn number_key(number: &Number) -> NumberKey {
    if let Some(value) = number.as_i64() {
        return NumberKey::Int(value as i128);
    }

    if let Some(value) = number.as_u64() {
        return NumberKey::Int(value as i128);
    }

    let value = number.as_f64().unwrap_or(f64::NAN);
    if value.fract() == 0.0 && value.abs() < I128_FLOAT_BOUND {
        NumberKey::Int(value as i128)
    } else {
        NumberKey::Float(value)
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    match (number_key(a), number_key(b)) {
        (NumberKey::Int(a), NumberKey::Int(b)) => a.cmp(&b),
        (NumberKey::Float(a), NumberKey::Float(b)) => a.total_cmp(&b),
        (NumberKey::Int(a), NumberKey::Float(b)) => (a as f64).total_cmp(&b),
        (NumberKey::Float(a), NumberKey::Int(b)) => a.total_cmp(&(b as f64)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over document values used for keys and for sorting group members.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (a, b) in a.iter().zip(b.iter()) {
                let ordering = compare_values(a, b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            for ((a_key, a_value), (b_key, b_value)) in a.iter().zip(b.iter()) {
                let ordering = a_key
                    .cmp(b_key)
                    .then_with(|| compare_values(a_value, b_value));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    type_rank(value).hash(state);

    match value {
        Value::Null => {}
        Value::Bool(value) => value.hash(state),
        Value::Number(number) => match number_key(number) {
            NumberKey::Int(value) => {
                0u8.hash(state);
                value.hash(state);
            }
            NumberKey::Float(value) => {
                1u8.hash(state);
                value.to_bits().hash(state);
            }
        },
        Value::String(value) => value.hash(state),
        Value::Array(values) => {
            values.len().hash(state);
            for value in values {
                hash_value(value, state);
            }
        }
        Value::Object(map) => {
            map.len().hash(state);
            for (key, value) in map {
                key.hash(state);
                hash_value(value, state);
            }
        }
    }
}

/// The join value found in a parent field.
///
/// A field is either a bare foreign key or, once merged, the embedded child document which
/// still carries the key under the child key field. Only the key is kept in both cases.
#[derive(Debug, Clone, PartialEq)]
pub enum ForeignKeyValue {
    Raw(JoinKey),
    Embedded(JoinKey),
}

impl ForeignKeyValue {
    /// Reads the foreign key out of a parent field value.
    ///
    /// Objects are treated as previously merged children. An object without `child_key` cannot
    /// be re-merged and fails with [`ErrorKind::InvalidForeignKey`].
    pub fn from_field(value: &Value, child_key: &str) -> MergeResult<Self> {
        match value {
            Value::Object(document) => match get_path(document, child_key) {
                Some(key) if !key.is_null() => {
                    Ok(ForeignKeyValue::Embedded(JoinKey::new(key.clone())))
                }
                _ => bail!(
                    ErrorKind::InvalidForeignKey,
                    "Embedded document is missing its child key",
                    format!("expected key `{child_key}` in {value}")
                ),
            },
            other => Ok(ForeignKeyValue::Raw(JoinKey::new(other.clone()))),
        }
    }

    pub fn key(&self) -> &JoinKey {
        match self {
            ForeignKeyValue::Raw(key) | ForeignKeyValue::Embedded(key) => key,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, ForeignKeyValue::Embedded(..))
    }
}
