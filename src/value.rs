//! Runtime-typed value tree.
//!
//! Every cell, once parsed, canonicalizes to a [`Value`]. This is the single
//! tagged sum the rest of the crate operates on: cell parsers produce it,
//! the expression evaluator consumes and produces it, and exploded-column
//! assembly builds nested `Record`/`Tuple`/`List`/`Map` values out of leaf
//! values read from sibling cells.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// A canonical, typed value.
///
/// `Map` and `Record` use [`IndexMap`] rather than a hash map so iteration
/// order matches insertion order — required for deterministic
/// serialization (spec §3, §9).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Tuple(Vec<Value>),
    Record(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The basic-scalar test used for primary keys (spec §3 Row).
    pub fn is_basic_scalar(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Stringify a basic scalar for use as a dataset key index (spec §3/§4.G:
    /// numbers are stringified so they don't collide with integer row
    /// positions).
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "map",
            Value::Tuple(_) => "tuple",
            Value::Record(_) => "record",
        }
    }
}

/// `NaN != NaN` falls directly out of `f64`'s own equality (spec §4.D,
/// §9): no special-cased float comparison is written here.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Tuple(a), Tuple(b)) => a == b,
            (Record(a), Record(b)) => a == b,
            _ => false,
        }
    }
}

/// Natural-JSON style formatting used in reformatted cell text: `inf`/`-inf`
/// serialize as-is (spec §4.D says typed JSON keeps `inf`/`-inf`; natural
/// JSON instead uses the literal strings, which is a concern of the
/// serializer, not of this canonical formatter — this function produces the
/// typed-form text used for `reformatted`).
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Value::Map(m) | Value::Record(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_not_equal_to_itself() {
        let a = Value::Float(f64::NAN);
        let b = Value::Float(f64::NAN);
        assert_ne!(a, b);
    }

    #[test]
    fn key_string_stringifies_numbers() {
        assert_eq!(Value::Int(42).key_string(), Some("42".to_string()));
        assert_eq!(Value::Str("x".into()).key_string(), Some("x".to_string()));
    }

    #[test]
    fn map_preserves_insertion_order() {
        let mut m = IndexMap::new();
        m.insert("b".to_string(), Value::Int(1));
        m.insert("a".to_string(), Value::Int(2));
        let v = Value::Record(m);
        assert_eq!(v.to_string(), "{b=1,a=2}");
    }
}
