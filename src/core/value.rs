//! Purpose: Dynamic cell/row value model used for driver cells, bind args and output rows.
//! Exports: `Value`, `Row`.
//! Role: JSON-shaped tree with a lossless decimal variant; serializes like the wire output.
//! Invariants: Object keys are sorted (`BTreeMap`) so encoded rows are deterministic.
//! Invariants: Decimals encode as JSON strings with trailing zeros trimmed.
use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Number;

/// One output unit: property name to value, possibly nested.
pub type Row = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Object(Row),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Row> {
        match self {
            Value::Object(row) => Some(row),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => number_value(&n),
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(d) => serde_json::Value::String(d.normalize().to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::from(b.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(row) => serde_json::Value::Object(
                row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn number_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        return Value::Int(i);
    }
    if let Some(u) = n.as_u64() {
        return Value::Decimal(Decimal::from(u));
    }
    Value::Float(n.as_f64().unwrap_or(f64::NAN))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Decimal(d) => serializer.collect_str(&d.normalize()),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for byte in bytes {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(row) => {
                let mut map = serializer.serialize_map(Some(row.len()))?;
                for (k, v) in row {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Decimal(d) => write!(f, "{}", d.normalize()),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(_) | Value::List(_) | Value::Object(_) => {
                match serde_json::to_string(self) {
                    Ok(encoded) => write!(f, "{encoded}"),
                    Err(_) => write!(f, "<{}>", self.type_name()),
                }
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Row> for Value {
    fn from(value: Row) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::{Row, Value};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn decimal_serializes_as_trimmed_string() {
        let value = Value::Decimal(Decimal::from_str("16.160").expect("decimal"));
        let encoded = serde_json::to_string(&value).expect("encode");
        assert_eq!(encoded, "\"16.16\"");
    }

    #[test]
    fn object_keys_encode_sorted() {
        let mut row = Row::new();
        row.insert("b".to_string(), Value::from(2));
        row.insert("a".to_string(), Value::from("x"));
        let encoded = serde_json::to_string(&Value::Object(row)).expect("encode");
        assert_eq!(encoded, r#"{"a":"x","b":2}"#);
    }

    #[test]
    fn from_json_maps_scalars_and_containers() {
        let value = Value::from_json(json!({"n": 1, "f": 1.5, "s": "x", "l": [true, null]}));
        let row = value.as_object().expect("object");
        assert_eq!(row["n"], Value::Int(1));
        assert_eq!(row["f"], Value::Float(1.5));
        assert_eq!(row["s"], Value::from("x"));
        assert_eq!(row["l"], Value::List(vec![Value::Bool(true), Value::Null]));
    }

    #[test]
    fn huge_unsigned_json_number_stays_exact() {
        let value = Value::from_json(json!(18446744073709551615u64));
        assert_eq!(value.to_string(), "18446744073709551615");
    }

    #[test]
    fn to_json_matches_serialize() {
        let mut row = Row::new();
        row.insert("price".to_string(), Value::Decimal(Decimal::new(1616, 2)));
        row.insert("tags".to_string(), Value::List(vec![Value::from("a")]));
        let value = Value::Object(row);
        assert_eq!(
            value.to_json(),
            serde_json::to_value(&value).expect("to_value")
        );
    }
}
