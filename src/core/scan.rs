//! Purpose: Per-cell value scanners selected by the column plan.
//! Exports: `ColumnScanner`, `Scanner`, `scan_text`, `scan_decimal`, `scan_json`, `bool_column`.
//! Role: Normalize raw driver cells into output values (text, decimal, JSON trees, booleans).
//! Invariants: Integers and formatted decimal text convert to decimals exactly.
//! Invariants: Float-to-decimal conversion goes through the shortest float text form,
//! so binary-float imprecision is accepted rather than corrected.
//! Invariants: Malformed JSON or decimal text is a `Decode` error; nothing is guessed.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bstr::ByteSlice;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::core::error::Error;
use crate::core::value::Value;
use crate::json::parse;

/// Caller-supplied scanner for one column; replaces type-driven scanning entirely.
pub type ColumnScanner = Arc<dyn Fn(Value) -> Result<Value, Error> + Send + Sync>;

#[derive(Clone)]
pub enum Scanner {
    Custom(ColumnScanner),
    Json,
    Decimal,
    Text,
    Raw,
}

impl Scanner {
    pub fn scan(&self, raw: Value) -> Result<Value, Error> {
        match self {
            Scanner::Custom(scanner) => scanner(raw),
            Scanner::Json => scan_json(raw),
            Scanner::Decimal => scan_decimal(raw),
            Scanner::Text => Ok(scan_text(raw)),
            Scanner::Raw => Ok(raw),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scanner::Custom(_) => "custom",
            Scanner::Json => "json",
            Scanner::Decimal => "decimal",
            Scanner::Text => "text",
            Scanner::Raw => "raw",
        }
    }
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte sequences become text; everything else passes through.
pub fn scan_text(raw: Value) -> Value {
    match raw {
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(err) => Value::Text(err.as_bytes().to_str_lossy().into_owned()),
        },
        other => other,
    }
}

pub fn scan_decimal(raw: Value) -> Result<Value, Error> {
    match raw {
        Value::Float(f) => decimal_from_f64(f).map(Value::Decimal),
        Value::Int(i) => Ok(Value::Decimal(Decimal::from(i))),
        Value::Text(text) => parse_decimal(&text).map(Value::Decimal),
        Value::Bytes(bytes) => {
            let text = bytes
                .to_str()
                .map_err(|err| Error::decode("decimal bytes are not utf-8").with_source(err))?;
            parse_decimal(text).map(Value::Decimal)
        }
        other => Ok(other),
    }
}

pub fn scan_json(raw: Value) -> Result<Value, Error> {
    let parsed = match raw {
        Value::Bytes(bytes) => parse::from_slice::<serde_json::Value>(&bytes),
        Value::Text(text) => parse::from_str::<serde_json::Value>(&text),
        other => return Ok(other),
    };
    parsed
        .map(Value::from_json)
        .map_err(|err| Error::decode("invalid json column value").with_source(err))
}

/// Custom scanner mapping integer/text boolean encodings (e.g. MySQL TINYINT) to `Bool`.
///
/// Null reads as `false`.
pub fn bool_column(raw: Value) -> Result<Value, Error> {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::Int(i) => Ok(Value::Bool(i != 0)),
        Value::Float(f) => Ok(Value::Bool(f != 0.0)),
        Value::Decimal(d) => Ok(Value::Bool(!d.is_zero())),
        Value::Text(text) => parse_bool(&text).map(Value::Bool),
        Value::Bytes(bytes) => parse_bool(&bytes.to_str_lossy()).map(Value::Bool),
        Value::Null => Ok(Value::Bool(false)),
        other => Err(Error::decode(format!(
            "type {} is not a bool",
            other.type_name()
        ))),
    }
}

pub(crate) fn parse_bool(text: &str) -> Result<bool, Error> {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(Error::decode(format!("invalid bool {text:?}"))),
    }
}

pub(crate) fn parse_decimal(text: &str) -> Result<Decimal, Error> {
    let unquoted = strip_quotes(text);
    Decimal::from_str(unquoted)
        .or_else(|_| Decimal::from_scientific(unquoted))
        .map_err(|err| Error::decode(format!("invalid decimal {text:?}")).with_source(err))
}

pub(crate) fn decimal_from_f64(f: f64) -> Result<Decimal, Error> {
    if !f.is_finite() {
        return Err(Error::decode(format!("float {f} has no decimal form")));
    }
    Decimal::from_str(&f.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(f))
        .ok_or_else(|| Error::decode(format!("float {f} is out of decimal range")))
}

fn strip_quotes(text: &str) -> &str {
    if text.len() > 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::{Scanner, bool_column, scan_decimal, scan_json, scan_text};
    use crate::core::error::ErrorKind;
    use crate::core::value::Value;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    #[test]
    fn text_scanner_decodes_bytes_only() {
        assert_eq!(scan_text(Value::Bytes(b"abc".to_vec())), Value::from("abc"));
        assert_eq!(scan_text(Value::Int(3)), Value::Int(3));
        assert_eq!(scan_text(Value::Null), Value::Null);
    }

    #[test]
    fn decimal_text_is_stable_across_representations() {
        let inputs = [
            Value::Float(16.16),
            Value::from("16.16"),
            Value::Bytes(b"16.16".to_vec()),
            Value::from("\"16.16\""),
            Value::Bytes(b"\"16.16\"".to_vec()),
        ];
        for input in inputs {
            let scanned = scan_decimal(input).expect("decimal");
            assert_eq!(scanned.to_string(), "16.16");
        }
    }

    #[test]
    fn decimal_from_int_is_exact_with_zero_scale() {
        let scanned = scan_decimal(Value::Int(i64::MAX)).expect("decimal");
        match scanned {
            Value::Decimal(d) => {
                assert_eq!(d, Decimal::from(i64::MAX));
                assert_eq!(d.scale(), 0);
            }
            other => panic!("expected decimal, got {other:?}"),
        }
    }

    #[test]
    fn decimal_null_and_other_pass_through() {
        assert_eq!(scan_decimal(Value::Null).expect("null"), Value::Null);
        assert_eq!(scan_decimal(Value::Bool(true)).expect("bool"), Value::Bool(true));
    }

    #[test]
    fn malformed_decimal_is_decode_error() {
        let err = scan_decimal(Value::from("12.x")).expect_err("bad decimal");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn scientific_decimal_text_is_accepted() {
        let scanned = scan_decimal(Value::from("1.5e3")).expect("decimal");
        assert_eq!(scanned.to_string(), "1500");
    }

    #[test]
    fn json_scanner_parses_text_and_bytes() {
        let scanned = scan_json(Value::from(r#"{"a":[1,"x"]}"#)).expect("json");
        let obj = scanned.as_object().expect("object");
        assert_eq!(obj["a"], Value::List(vec![Value::Int(1), Value::from("x")]));

        let scanned = scan_json(Value::Bytes(b"[true]".to_vec())).expect("json bytes");
        assert_eq!(scanned, Value::List(vec![Value::Bool(true)]));

        assert_eq!(scan_json(Value::Int(7)).expect("passthrough"), Value::Int(7));
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let err = scan_json(Value::from("{not json")).expect_err("bad json");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn bool_column_accepts_common_encodings() {
        assert_eq!(bool_column(Value::Int(1)).expect("int"), Value::Bool(true));
        assert_eq!(bool_column(Value::Int(0)).expect("int"), Value::Bool(false));
        assert_eq!(bool_column(Value::from("true")).expect("text"), Value::Bool(true));
        assert_eq!(bool_column(Value::Bytes(b"F".to_vec())).expect("bytes"), Value::Bool(false));
        assert_eq!(bool_column(Value::Null).expect("null"), Value::Bool(false));
        assert!(bool_column(Value::from("maybe")).is_err());
        assert!(bool_column(Value::List(Vec::new())).is_err());
    }

    #[test]
    fn custom_scanner_delegates() {
        let scanner = Scanner::Custom(Arc::new(|raw: Value| {
            Ok(Value::from(format!("<{raw}>")))
        }));
        assert_eq!(scanner.scan(Value::Int(2)).expect("custom"), Value::from("<2>"));
    }
}
