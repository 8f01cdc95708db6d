//! # Runtime Value Representation
//!
//! This module provides [`Value`], the runtime representation for typed row
//! values, and [`SqlType`], the declared column types they coerce to.
//!
//! ## Value Variants
//!
//! | Variant | Rust Type | Total ordering |
//! |---------|-----------|----------------|
//! | Null    | -         | yes |
//! | Boolean | bool      | yes |
//! | Int     | i32       | yes |
//! | Long    | i64       | yes |
//! | Double  | f64       | **no** (NaN, signed zero) |
//! | Text    | String    | yes |
//! | Bytes   | Vec<u8>   | yes |
//!
//! The total-ordering distinction matters for the hash index: a column type
//! whose `compare` disagrees with equality (`Double`: `0.0 == -0.0` but the
//! bit patterns differ, NaN is unordered) must be backed by an ordered map
//! with an explicit comparator instead of a hash map.
//!
//! ## Comparison Semantics
//!
//! `compare` imposes a total order usable by ordered index backings: NULL
//! sorts first, numeric variants compare numerically across Int/Long/Double
//! (Double via `f64::total_cmp`), and cross-type ordering follows variant
//! rank. Equality for map keys is exact (bit equality for Double).

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use eyre::{bail, Result};

/// Declared column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    Int,
    Long,
    Double,
    Text,
    Bytes,
}

impl SqlType {
    /// Whether values of this type have a total ordering that agrees with
    /// equality. Drives the hash-index backing choice.
    pub fn has_total_ordering(self) -> bool {
        !matches!(self, SqlType::Double)
    }
}

/// A single typed value inside a row.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Variant rank used for cross-type ordering.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int(_) => 2,
            Value::Long(_) => 2,
            Value::Double(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
        }
    }

    /// Interprets this value as a 64-bit key. Used by the main-index-column
    /// fast path of the data index.
    pub fn as_long(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i as i64),
            Value::Long(l) => Ok(*l),
            Value::Boolean(b) => Ok(*b as i64),
            Value::Double(d) => Ok(*d as i64),
            v => bail!("value {:?} has no integral key representation", v),
        }
    }

    /// Converts this value to the given declared type, so that index probes
    /// with a compatible but different type (Int against a Long column) hit
    /// the stored representation.
    pub fn convert_to(&self, target: SqlType) -> Result<Value> {
        let converted = match (self, target) {
            (Value::Null, _) => Value::Null,
            (Value::Boolean(b), SqlType::Boolean) => Value::Boolean(*b),
            (Value::Boolean(b), SqlType::Int) => Value::Int(*b as i32),
            (Value::Boolean(b), SqlType::Long) => Value::Long(*b as i64),
            (Value::Int(i), SqlType::Int) => Value::Int(*i),
            (Value::Int(i), SqlType::Long) => Value::Long(*i as i64),
            (Value::Int(i), SqlType::Double) => Value::Double(*i as f64),
            (Value::Int(i), SqlType::Text) => Value::Text(i.to_string()),
            (Value::Long(l), SqlType::Long) => Value::Long(*l),
            (Value::Long(l), SqlType::Int) => Value::Int(i32::try_from(*l)?),
            (Value::Long(l), SqlType::Double) => Value::Double(*l as f64),
            (Value::Long(l), SqlType::Text) => Value::Text(l.to_string()),
            (Value::Double(d), SqlType::Double) => Value::Double(*d),
            (Value::Double(d), SqlType::Long) => Value::Long(*d as i64),
            (Value::Double(d), SqlType::Int) => Value::Int(*d as i32),
            (Value::Text(s), SqlType::Text) => Value::Text(s.clone()),
            (Value::Text(s), SqlType::Int) => Value::Int(s.trim().parse::<i32>()?),
            (Value::Text(s), SqlType::Long) => Value::Long(s.trim().parse::<i64>()?),
            (Value::Text(s), SqlType::Double) => Value::Double(s.trim().parse::<f64>()?),
            (Value::Bytes(b), SqlType::Bytes) => Value::Bytes(b.clone()),
            (v, t) => bail!("cannot convert {:?} to {:?}", v, t),
        };
        Ok(converted)
    }

    /// Total order over values. NULL first, numerics compared numerically,
    /// otherwise by variant rank then content.
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (a, b) => {
                // same numeric rank: Int / Long / Double mix
                if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
                    a.numeric_as_f64().total_cmp(&b.numeric_as_f64())
                } else {
                    let xa = a.as_long().unwrap_or(i64::MIN);
                    let xb = b.as_long().unwrap_or(i64::MIN);
                    xa.cmp(&xb)
                }
            }
        }
    }

    fn numeric_as_f64(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Long(l) => *l as f64,
            Value::Double(d) => *d,
            Value::Boolean(b) => *b as i64 as f64,
            _ => f64::NAN,
        }
    }

    /// Approximate heap memory of this value, in bytes.
    pub fn memory(&self) -> usize {
        let base = std::mem::size_of::<Value>();
        match self {
            Value::Text(s) => base + s.len(),
            Value::Bytes(b) => base + b.len(),
            _ => base,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            // bit equality so that Eq and Hash stay consistent
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Long(l) => l.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_before_everything() {
        assert_eq!(Value::Null.compare(&Value::Int(-100)), Ordering::Less);
        assert_eq!(
            Value::Null.compare(&Value::Text(String::new())),
            Ordering::Less
        );
    }

    #[test]
    fn mixed_numeric_comparison() {
        assert_eq!(Value::Int(3).compare(&Value::Long(4)), Ordering::Less);
        assert_eq!(Value::Long(5).compare(&Value::Double(4.5)), Ordering::Greater);
        assert_eq!(Value::Int(2).compare(&Value::Double(2.0)), Ordering::Equal);
    }

    #[test]
    fn double_has_no_total_ordering() {
        assert!(!SqlType::Double.has_total_ordering());
        assert!(SqlType::Long.has_total_ordering());
        assert!(SqlType::Text.has_total_ordering());
    }

    #[test]
    fn double_equality_is_bitwise() {
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }

    #[test]
    fn convert_int_probe_to_long_column() {
        let probe = Value::Int(7);
        let converted = probe.convert_to(SqlType::Long).unwrap();
        assert_eq!(converted, Value::Long(7));
    }

    #[test]
    fn convert_rejects_incompatible_types() {
        assert!(Value::Bytes(vec![1]).convert_to(SqlType::Int).is_err());
    }

    #[test]
    fn as_long_on_non_numeric_fails() {
        assert!(Value::Text("x".into()).as_long().is_err());
    }
}
