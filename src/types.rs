//! Types module: defines the value domain shared by records and expressions.
//!
//! This module provides the Value and ValueKind enums, truthiness, the natural
//! ordering used by comparisons, and the hashing used by dedupe and sort.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Integer,
    Float,
    Text,
    Boolean,
    Null,
}

/// A single field or expression value.
///
/// Serialized untagged, so a JSON object such as `{"id": 1, "price": 9.5,
/// "name": "x", "active": true, "note": null}` decodes straight into values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Shared absent value, handed out for missing fields.
pub static NULL: Value = Value::Null;

impl ValueKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Float)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Null => ValueKind::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerces the value to a boolean for `and`, `or`, `not` and filtering.
    ///
    /// Null, zero, `0.0` and empty text are false; booleans are themselves;
    /// everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Boolean(b) => *b,
        }
    }

    /// Numeric view of the value. Booleans count as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) | Value::Null => None,
        }
    }

    /// Integer view used by arithmetic. Booleans count as 0/1, floats do not convert.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Natural ordering between two non-null values.
    ///
    /// Integers, floats and booleans compare numerically across kinds, text
    /// compares lexicographically. Returns `None` when either side is null,
    /// when text meets a non-text value, or when a float is NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(a.as_str().cmp(b.as_str())),
            (Value::Text(_), _) | (_, Value::Text(_)) => None,
            (a, b) => compare_numbers(a.number()?, b.number()?),
        }
    }

    // Booleans are the integers 0 and 1.
    fn number(&self) -> Option<Number> {
        match self {
            Value::Integer(i) => Some(Number::Int(*i)),
            Value::Boolean(b) => Some(Number::Int(*b as i64)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::Null | Value::Text(_) => None,
        }
    }

    /// Deterministic structural hash. Numerically equal integers and floats
    /// hash the same; the result does not vary between process runs.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        ValueKey(self).hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Boolean(true) => write!(f, "True"),
            Value::Boolean(false) => write!(f, "False"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

// 2^63, the first float past i64::MAX
const I64_END: f64 = 9_223_372_036_854_775_808.0;

/// Exact ordering of an integer against a float. No rounding through `as f64`,
/// so `2^53 + 1` is greater than `2^53` as a float.
fn compare_int_float(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f >= I64_END {
        return Some(Ordering::Less);
    }
    if f < -I64_END {
        return Some(Ordering::Greater);
    }
    let whole = f.trunc();
    Some(i.cmp(&(whole as i64)).then_with(|| {
        if f > whole {
            Ordering::Less
        } else if f < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }))
}

fn compare_numbers(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
        (Number::Float(a), Number::Float(b)) => a.partial_cmp(&b),
        (Number::Int(a), Number::Float(b)) => compare_int_float(a, b),
        (Number::Float(a), Number::Int(b)) => compare_int_float(b, a).map(Ordering::reverse),
    }
}

// Integral floats in i64 range hash as the integer they equal.
fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-I64_END..I64_END).contains(&f)).then_some(f as i64)
}

/// Borrowed value with set semantics: numbers are equal when exactly equal
/// whatever their kind (`True`, `1` and `1.0` are one key), null equals null,
/// NaN equals NaN.
#[derive(Debug, Clone, Copy)]
pub struct ValueKey<'a>(pub &'a Value);

impl PartialEq for ValueKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self.0, other.0) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Float(a), Value::Float(b)) if a.is_nan() && b.is_nan() => true,
            (a, b) => match (a.number(), b.number()) {
                (Some(a), Some(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
                _ => false,
            },
        }
    }
}

impl Eq for ValueKey<'_> {}

impl Hash for ValueKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.0 {
            Value::Null => 0u8.hash(state),
            Value::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Value::Boolean(b) => {
                1u8.hash(state);
                (*b as i64).hash(state);
            }
            Value::Float(f) => match integral(*f) {
                Some(i) => {
                    1u8.hash(state);
                    i.hash(state);
                }
                None => {
                    3u8.hash(state);
                    canonical_bits(*f).hash(state);
                }
            },
            Value::Text(s) => {
                2u8.hash(state);
                s.hash(state);
            }
        }
    }
}

// every NaN is one key
fn canonical_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}
