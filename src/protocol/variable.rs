//! Loosely typed values carried by custom plugin elements.
//!
//! Custom elements ship an arbitrary key/value bag chosen by whoever built the
//! plugin. [`Variable`] keeps that bag typed inside the crate; conversion to
//! and from `serde_json::Value` happens only at the presentation boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A recursive JSON-like value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variable {
    /// JSON `null`.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integral number that fits an `i64`.
    Int(i64),
    /// Any other number.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    Array(Vec<Variable>),
    /// String-keyed map.
    Object(BTreeMap<String, Variable>),
}

impl Variable {
    /// Borrow the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read an integral value, accepting doubles without a fractional part.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    /// Look up a key when this is an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Variable> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<Value> for Variable {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Double(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&Variable> for Value {
    fn from(variable: &Variable) -> Self {
        match variable {
            Variable::Null => Value::Null,
            Variable::Bool(b) => Value::Bool(*b),
            Variable::Int(i) => Value::from(*i),
            // Non-finite doubles have no JSON spelling
            Variable::Double(d) => serde_json::Number::from_f64(*d).map_or(Value::Null, Value::Number),
            Variable::String(s) => Value::String(s.clone()),
            Variable::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            Variable::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Variable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Variable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_keep_their_kind() {
        let v = Variable::from(json!({"count": 3, "ratio": 0.5, "big": 18446744073709551615u64}));
        assert_eq!(v.get("count"), Some(&Variable::Int(3)));
        assert_eq!(v.get("ratio"), Some(&Variable::Double(0.5)));
        assert!(matches!(v.get("big"), Some(Variable::Double(_))));
    }

    #[test]
    fn test_nested_values_survive_json() {
        let raw = json!({
            "title": "Order",
            "items": [{"sku": "A-1", "qty": 2}, null, true],
        });
        let v = Variable::from(raw.clone());
        let back: Value = serde_json::to_value(&v).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn test_as_i64_accepts_whole_doubles() {
        assert_eq!(Variable::Double(42.0).as_i64(), Some(42));
        assert_eq!(Variable::Double(4.2).as_i64(), None);
        assert_eq!(Variable::String("7".into()).as_i64(), None);
    }
}
