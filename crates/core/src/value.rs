//! Value types.
//!
//! Callers build [`Value`]s (a 32-bit integer or an owned string); the
//! engine interns them into [`ValueId`]s before anything touches the
//! relation index. Comparison rules live here so the ordered per-key
//! indexes, the query filters, and the snapshot canonicalization all agree:
//! integers compare numerically, strings compare bytewise, and integers
//! sort before strings.

use crate::atoms::{IntId, StrId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A value as supplied by and returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit signed integer
    Int(i32),
    /// UTF-8 string
    Str(String),
}

impl Value {
    /// The string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Int(_) => None,
        }
    }

    /// The integer payload, if this is an integer value.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Str(_) => None,
        }
    }

    /// Total order over values: ints numerically, strings bytewise,
    /// ints before strings.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Int(_), Value::Str(_)) => Ordering::Less,
            (Value::Str(_), Value::Int(_)) => Ordering::Greater,
        }
    }

    /// Like [`Value::compare`] but string payloads compare by their
    /// ASCII-uppercased bytes.
    pub fn compare_caseless(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => caseless_cmp(a, b),
            _ => self.compare(other),
        }
    }
}

/// Compare two strings by ASCII-uppercased bytes.
pub fn caseless_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.bytes().map(|c| c.to_ascii_uppercase());
    let mut bi = b.bytes().map(|c| c.to_ascii_uppercase());
    loop {
        match (ai.next(), bi.next()) {
            (Some(x), Some(y)) => match x.cmp(&y) {
                Ordering::Equal => continue,
                ord => return ord,
            },
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// An interned value: what the relation index actually stores.
///
/// Id equality implies semantic equality; ordering still needs the atom
/// tables (see `Atoms::cmp_values`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueId {
    /// Interned 32-bit integer
    Int(IntId),
    /// Interned string
    Str(StrId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_int_order() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Ordering::Less);
        assert_eq!(Value::Int(-5).compare(&Value::Int(-5)), Ordering::Equal);
        assert_eq!(Value::Int(10).compare(&Value::Int(2)), Ordering::Greater);
    }

    #[test]
    fn test_str_order_is_bytewise() {
        assert_eq!(
            Value::from("abc").compare(&Value::from("abd")),
            Ordering::Less
        );
        // Uppercase sorts before lowercase in byte order
        assert_eq!(Value::from("B").compare(&Value::from("a")), Ordering::Less);
    }

    #[test]
    fn test_ints_sort_before_strings() {
        assert_eq!(
            Value::Int(999).compare(&Value::from("0")),
            Ordering::Less
        );
        assert_eq!(
            Value::from("0").compare(&Value::Int(999)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_caseless_equality() {
        assert_eq!(
            Value::from("FooBar").compare_caseless(&Value::from("fOOBAR")),
            Ordering::Equal
        );
        assert_ne!(
            Value::from("FooBar").compare(&Value::from("fOOBAR")),
            Ordering::Equal
        );
    }

    #[test]
    fn test_caseless_only_affects_strings() {
        assert_eq!(
            Value::Int(3).compare_caseless(&Value::from("a")),
            Ordering::Less
        );
        assert_eq!(
            Value::Int(3).compare_caseless(&Value::Int(4)),
            Ordering::Less
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::from("xyz").to_string(), "xyz");
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i32>().prop_map(Value::Int),
            "[ -~]{0,12}".prop_map(Value::Str),
        ]
    }

    proptest! {
        #[test]
        fn prop_compare_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
        }

        #[test]
        fn prop_compare_transitive(a in arb_value(), b in arb_value(), c in arb_value()) {
            let mut v = vec![a, b, c];
            v.sort_by(|x, y| x.compare(y));
            // A total order sorts consistently: adjacent pairs are ordered
            prop_assert_ne!(v[0].compare(&v[1]), Ordering::Greater);
            prop_assert_ne!(v[1].compare(&v[2]), Ordering::Greater);
            prop_assert_ne!(v[0].compare(&v[2]), Ordering::Greater);
        }
    }
}
