//! Dynamic value model shared by the evaluator and the runtimes.
//!
//! Values form a tagged sum. Numeric coercion is deliberately concentrated
//! in [`Value::compare`]: comparisons promote across `Int`/`BigInt`/`Float`
//! (with `Bool` treated as 0/1), and equality requires equal promoted
//! magnitude. Nothing else in the crate re-implements numeric coercion.

use std::cmp::Ordering;
use std::fmt::{self, Write as _};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::bitstring::Bitstring;

/// A dynamic value.
///
/// Lists and maps own their contents by value; assignment sites copy on
/// write and replace whole roots atomically, so no aliasing or arena
/// indirection exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Integers outside the `i64` range.
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// String-keyed map preserving insertion order.
    Map(IndexMap<String, Value>),
    Bitstring(Bitstring),
    /// Opaque display string produced by print-like functions.
    ///
    /// Kept distinct from `Str` so the block executor can recognize it and
    /// emit it verbatim in collected output.
    PreFormatted(String),
}

/// Promoted numeric view used by the single comparator and by arithmetic.
#[derive(Debug, Clone)]
pub(crate) enum Numeric {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

impl Value {
    /// Human-readable type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Bitstring(_) => "bitstring",
            Self::PreFormatted(_) => "string",
        }
    }

    /// Truthiness: `Null` is false, `Bool` is itself, zero numbers and
    /// empty collections are false, everything else is true.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::BigInt(b) => !b.is_zero(),
            Self::Float(f) => *f != 0.0,
            Self::Str(s) | Self::PreFormatted(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
            Self::Bitstring(bits) => bits.bit_len() > 0,
        }
    }

    /// Numeric view for promotion, treating `Bool` as 0/1.
    pub(crate) fn as_numeric(&self) -> Option<Numeric> {
        match self {
            Self::Bool(b) => Some(Numeric::Int(i64::from(*b))),
            Self::Int(i) => Some(Numeric::Int(*i)),
            Self::BigInt(b) => Some(Numeric::Big(b.clone())),
            Self::Float(f) => Some(Numeric::Float(*f)),
            _ => None,
        }
    }

    /// The single comparator: total ordering where one exists.
    ///
    /// Numbers compare by promoted magnitude, strings and bytes
    /// lexicographically. Mixed or unordered types return `None`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        if let (Some(left), Some(right)) = (self.as_numeric(), other.as_numeric()) {
            return numeric_cmp(&left, &right);
        }
        match (self, other) {
            (Self::Str(a) | Self::PreFormatted(a), Self::Str(b) | Self::PreFormatted(b)) => Some(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality under the coercion rules: numbers compare by promoted
    /// magnitude, everything else structurally.
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        if let (Some(left), Some(right)) = (self.as_numeric(), other.as_numeric()) {
            return numeric_cmp(&left, &right) == Some(Ordering::Equal);
        }
        match (self, other) {
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other_v| v.loose_eq(other_v)))
            }
            _ => self == other,
        }
    }

    /// Renders the value the way user-facing output does: bare strings,
    /// JSON-style collections.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Str(s) | Self::PreFormatted(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// Source-like representation: strings quoted, collections recursive.
    #[must_use]
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.repr_fmt(&mut out);
        out
    }

    fn repr_fmt(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::BigInt(b) => {
                let _ = write!(out, "{b}");
            }
            Self::Float(f) => out.push_str(&format_float(*f)),
            Self::Str(s) | Self::PreFormatted(s) => {
                let _ = write!(out, "{s:?}");
            }
            Self::Bytes(bytes) => {
                out.push('[');
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{byte}");
                }
                out.push(']');
            }
            Self::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_fmt(out);
                }
                out.push(']');
            }
            Self::Map(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{key:?}: ");
                    value.repr_fmt(out);
                }
                out.push('}');
            }
            Self::Bitstring(bits) => {
                out.push_str("<<");
                for (i, byte) in bits.bytes().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{byte}");
                }
                let trailing = bits.bit_len() % 8;
                if trailing != 0 {
                    let _ = write!(out, ":{trailing}");
                }
                out.push_str(">>");
            }
        }
    }

    /// Converts a `serde_json::Value` into an engine value.
    ///
    /// Used when ingesting runtime capture output and CLI inputs. Integers
    /// that fit `i64` stay `Int`; larger magnitudes become `BigInt` or
    /// `Float` per what JSON carried.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::BigInt(BigInt::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect())
            }
        }
    }

    /// Best-effort conversion to JSON for interchange with runtimes.
    ///
    /// `BigInt` renders as a decimal string, bytes and bitstrings as byte
    /// arrays; `PreFormatted` degrades to a plain string.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::BigInt(b) => b
                .to_i64()
                .map_or_else(|| serde_json::Value::String(b.to_string()), serde_json::Value::from),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) | Self::PreFormatted(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(bytes) => serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), value.to_json());
                }
                serde_json::Value::Object(out)
            }
            Self::Bitstring(bits) => {
                serde_json::Value::Array(bits.bytes().iter().map(|b| serde_json::Value::from(*b)).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Formats a float with shortest round-trip representation.
fn format_float(f: f64) -> String {
    if f.is_finite() {
        ryu::Buffer::new().format(f).to_owned()
    } else if f.is_nan() {
        "nan".to_owned()
    } else if f > 0.0 {
        "inf".to_owned()
    } else {
        "-inf".to_owned()
    }
}

/// Orders two promoted numerics, widening as needed.
fn numeric_cmp(left: &Numeric, right: &Numeric) -> Option<Ordering> {
    match (left, right) {
        (Numeric::Int(a), Numeric::Int(b)) => Some(a.cmp(b)),
        (Numeric::Big(a), Numeric::Big(b)) => Some(a.cmp(b)),
        (Numeric::Int(a), Numeric::Big(b)) => Some(BigInt::from(*a).cmp(b)),
        (Numeric::Big(a), Numeric::Int(b)) => Some(a.cmp(&BigInt::from(*b))),
        (Numeric::Float(a), Numeric::Float(b)) => a.partial_cmp(b),
        (Numeric::Int(a), Numeric::Float(b)) => (*a as f64).partial_cmp(b),
        (Numeric::Float(a), Numeric::Int(b)) => a.partial_cmp(&(*b as f64)),
        // Large ints vs floats go through f64; magnitudes beyond 2^53
        // compare approximately.
        (Numeric::Big(a), Numeric::Float(b)) => a.to_f64().unwrap_or(f64::NAN).partial_cmp(b),
        (Numeric::Float(a), Numeric::Big(b)) => a.partial_cmp(&b.to_f64().unwrap_or(f64::NAN)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_of_empty_and_zero_values() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(!Value::Map(IndexMap::new()).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Str(" ".into()).is_truthy());
    }

    #[test]
    fn numeric_equality_promotes_across_tags() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).loose_eq(&Value::Int(1)));
        assert!(Value::Int(5).loose_eq(&Value::BigInt(BigInt::from(5))));
        assert!(!Value::Int(1).loose_eq(&Value::Float(1.5)));
    }

    #[test]
    fn comparison_promotes_bigint_and_float() {
        assert_eq!(
            Value::BigInt(BigInt::from(10)).compare(&Value::Int(3)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Str("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn repr_quotes_strings_and_nests_collections() {
        let mut map = IndexMap::new();
        map.insert("users".to_owned(), Value::List(vec![Value::Str("x".into())]));
        assert_eq!(Value::Map(map).repr(), r#"{"users": ["x"]}"#);
        assert_eq!(Value::Float(1.5).repr(), "1.5");
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        let value = Value::Map(
            [
                ("a".to_owned(), Value::Int(1)),
                ("b".to_owned(), Value::List(vec![Value::Bool(true), Value::Null])),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(Value::from_json(value.to_json()), value);
    }
}
