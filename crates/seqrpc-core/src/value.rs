//! Dynamically-typed values carried as call parameters and results.
//!
//! The set of kinds is closed: anything a service method accepts or returns must
//! be expressible as one of the `Value` variants. Method dispatch keys on the
//! `ValueKind` of each parameter, so the conversion traits here also report the
//! kind a Rust type corresponds to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single parameter or result value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// The kind of a `Value`, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a parameter signature as `(int, str)`.
pub fn format_signature(kinds: &[ValueKind]) -> String {
    let names: Vec<&str> = kinds.iter().map(ValueKind::as_str).collect();
    format!("({})", names.join(", "))
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// JSON has no representation for NaN or infinities.
    pub fn is_encodable(&self) -> bool {
        match self {
            Value::Float(x) => x.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int as i64,
    u32 => Int as i64,
    f64 => Float,
    f32 => Float as f64,
    String => Str,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

/// A Rust type that can be extracted from a call parameter.
///
/// `KIND` is the parameter kind the type binds to in a method signature.
pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    const KIND: ValueKind = ValueKind::Int;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Str;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

/// Conversion of a method's return value into a call result.
///
/// `Ok(None)` is a void return; `Err` becomes an invocation failure carrying
/// the message.
pub trait IntoReply {
    fn into_reply(self) -> Result<Option<Value>, String>;
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Option<Value>, String> {
        Ok(None)
    }
}

macro_rules! reply_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Result<Option<Value>, String> {
                    Ok(Some(Value::from(self)))
                }
            }
        )*
    };
}

reply_from_value!(Value, bool, i64, i32, u32, f64, f32, String, &'static str, Vec<u8>);

impl<T: Into<Value>> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Option<Value>, String> {
        Ok(Some(self.map(Into::into).unwrap_or(Value::Null)))
    }
}

impl<T: IntoReply, E: fmt::Display> IntoReply for Result<T, E> {
    fn into_reply(self) -> Result<Option<Value>, String> {
        self.map_err(|e| e.to_string())
            .and_then(IntoReply::into_reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::from(5i64).kind(), ValueKind::Int);
        assert_eq!(Value::from(2.5).kind(), ValueKind::Float);
        assert_eq!(Value::from("x").kind(), ValueKind::Str);
        assert_eq!(Value::from(vec![1u8, 2]).kind(), ValueKind::Bytes);
        assert_eq!(Value::from(true).kind(), ValueKind::Bool);
        assert_eq!(Value::Null.kind(), ValueKind::Null);
    }

    #[test]
    fn test_value_json_is_tagged() {
        let json = serde_json::to_string(&Value::Int(7)).unwrap();
        assert_eq!(json, r#"{"kind":"int","value":7}"#);

        let json = serde_json::to_string(&Value::Null).unwrap();
        assert_eq!(json, r#"{"kind":"null"}"#);
    }

    #[test]
    fn test_from_value_rejects_other_kinds() {
        assert_eq!(i64::from_value(&Value::Int(3)), Some(3));
        assert_eq!(i64::from_value(&Value::Float(3.0)), None);
        assert_eq!(String::from_value(&Value::Int(3)), None);
    }

    #[test]
    fn test_into_reply_variants() {
        assert_eq!(().into_reply(), Ok(None));
        assert_eq!(5i64.into_reply(), Ok(Some(Value::Int(5))));
        assert_eq!(None::<i64>.into_reply(), Ok(Some(Value::Null)));

        let failed: Result<i64, String> = Err("division by zero".to_string());
        assert_eq!(failed.into_reply(), Err("division by zero".to_string()));
    }

    #[test]
    fn test_signature_format() {
        assert_eq!(format_signature(&[]), "()");
        assert_eq!(
            format_signature(&[ValueKind::Int, ValueKind::Str]),
            "(int, str)"
        );
    }

    #[test]
    fn test_non_finite_float_not_encodable() {
        assert!(Value::Float(1.5).is_encodable());
        assert!(!Value::Float(f64::NAN).is_encodable());
        assert!(!Value::Float(f64::INFINITY).is_encodable());
    }
}
