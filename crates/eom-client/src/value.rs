//! Call arguments and reply values
//!
//! Every call, reply and push carries a flat array of these. The service
//! contract only uses `Int32`, but the codec round-trips all four kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One element of a call/reply/push value array
///
/// Serialized for the socket backend as `{"int32": 5}`, `{"string": "..."}`, etc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Int32(i32),
    Uint32(u32),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int32(_) => "int32",
            Value::Uint32(_) => "uint32",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint32(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Uint32(v) => write!(f, "{}u", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Render a value array as `a,b,c` for log lines
pub fn display_values(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Extract every element as int32, failing on the first index that is not one
pub fn int32_fields(values: &[Value]) -> Result<Vec<i32>, usize> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| value.as_i32().ok_or(index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let values = vec![
            Value::Int32(-4),
            Value::Uint32(7),
            Value::from("org.eom.client42"),
            Value::Bytes(vec![1, 2]),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(
            json,
            r#"[{"int32":-4},{"uint32":7},{"string":"org.eom.client42"},{"bytes":[1,2]}]"#
        );
    }

    #[test]
    fn test_int32_fields() {
        assert_eq!(int32_fields(&[1.into(), 2.into()]), Ok(vec![1, 2]));
        assert_eq!(int32_fields(&[1.into(), Value::Uint32(2)]), Err(1));
        assert_eq!(int32_fields(&[]), Ok(vec![]));
    }

    #[test]
    fn test_display_values() {
        let values = vec![Value::Int32(1), Value::from("x"), Value::Bytes(vec![0; 3])];
        assert_eq!(display_values(&values), r#"1,"x",<3 bytes>"#);
    }
}
