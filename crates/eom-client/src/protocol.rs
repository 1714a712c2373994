//! Output service method names and payload layouts
//!
//! All payloads are flat int32 arrays. Decoding is positional and checks
//! the field count before anything else.

use thiserror::Error;

use crate::value::{int32_fields, Value};

pub const GET_OUTPUT_IDS: &str = "GetOutputIDs";
pub const GET_OUTPUT_INFO: &str = "GetOutputInfo";
pub const SET_OUTPUT_ATTRIBUTE: &str = "SetOutputAttribute";
pub const SET_WINDOW: &str = "SetWindow";
pub const SET_MODE: &str = "SetMode";

/// Push carrying every output state change
pub const NOTIFY: &str = "Notify";

/// Payload did not match the expected layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("field {index} is {found}, expected int32")]
    NotInt32 { index: usize, found: &'static str },
}

fn fixed_int32_fields<const N: usize>(values: &[Value]) -> Result<[i32; N], PayloadError> {
    if values.len() != N {
        return Err(PayloadError::FieldCount {
            expected: N,
            actual: values.len(),
        });
    }
    let fields = int32_fields(values).map_err(|index| PayloadError::NotInt32 {
        index,
        found: values[index].kind(),
    })?;
    let mut out = [0; N];
    out.copy_from_slice(&fields);
    Ok(out)
}

/// Reply to `GetOutputInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub id: i32,
    pub connector_type: i32,
    pub mode: i32,
    pub width: i32,
    pub height: i32,
    pub width_mm: i32,
    pub height_mm: i32,
    pub attribute: i32,
}

impl OutputInfo {
    pub const FIELD_COUNT: usize = 8;

    pub fn decode(values: &[Value]) -> Result<Self, PayloadError> {
        let [id, connector_type, mode, width, height, width_mm, height_mm, attribute] =
            fixed_int32_fields::<8>(values)?;
        Ok(Self {
            id,
            connector_type,
            mode,
            width,
            height,
            width_mm,
            height_mm,
            attribute,
        })
    }

    pub fn encode(&self) -> Vec<Value> {
        [
            self.id,
            self.connector_type,
            self.mode,
            self.width,
            self.height,
            self.width_mm,
            self.height_mm,
            self.attribute,
        ]
        .into_iter()
        .map(Value::Int32)
        .collect()
    }
}

/// Payload of a `Notify` push
///
/// Every category carries all eleven fields; which ones are meaningful
/// depends on the leading discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Notification {
    pub category: i32,
    pub output_id: i32,
    pub connector_type: i32,
    pub mode: i32,
    pub width: i32,
    pub height: i32,
    pub width_mm: i32,
    pub height_mm: i32,
    pub pid: i32,
    pub attribute: i32,
    pub attribute_state: i32,
}

impl Notification {
    pub const FIELD_COUNT: usize = 11;

    pub fn decode(values: &[Value]) -> Result<Self, PayloadError> {
        let [
            category,
            output_id,
            connector_type,
            mode,
            width,
            height,
            width_mm,
            height_mm,
            pid,
            attribute,
            attribute_state,
        ] = fixed_int32_fields::<11>(values)?;
        Ok(Self {
            category,
            output_id,
            connector_type,
            mode,
            width,
            height,
            width_mm,
            height_mm,
            pid,
            attribute,
            attribute_state,
        })
    }

    pub fn encode(&self) -> Vec<Value> {
        [
            self.category,
            self.output_id,
            self.connector_type,
            self.mode,
            self.width,
            self.height,
            self.width_mm,
            self.height_mm,
            self.pid,
            self.attribute,
            self.attribute_state,
        ]
        .into_iter()
        .map(Value::Int32)
        .collect()
    }
}

/// Interpret a control call reply: a leading nonzero int32 means success
pub fn is_success(reply: &[Value]) -> bool {
    reply.first().and_then(Value::as_i32).map_or(false, |v| v != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_output_info() {
        let reply: Vec<Value> = [5, 11, 1, 1920, 1080, 530, 300, 0]
            .into_iter()
            .map(Value::Int32)
            .collect();
        let info = OutputInfo::decode(&reply).unwrap();
        assert_eq!(info.id, 5);
        assert_eq!(info.connector_type, 11);
        assert_eq!(info.width, 1920);
        assert_eq!(info.height_mm, 300);
        assert_eq!(info.encode(), reply);
    }

    #[test]
    fn test_decode_rejects_wrong_count() {
        let reply = vec![Value::Int32(5); 7];
        assert_eq!(
            OutputInfo::decode(&reply),
            Err(PayloadError::FieldCount {
                expected: 8,
                actual: 7
            })
        );
        assert!(matches!(
            Notification::decode(&vec![Value::Int32(1); 12]),
            Err(PayloadError::FieldCount { actual: 12, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_non_int32() {
        let mut args = vec![Value::Int32(1); Notification::FIELD_COUNT];
        args[8] = Value::from("pid");
        assert_eq!(
            Notification::decode(&args),
            Err(PayloadError::NotInt32 {
                index: 8,
                found: "string"
            })
        );
    }

    #[test]
    fn test_notification_field_order() {
        let args: Vec<Value> = (1..=11).map(Value::Int32).collect();
        let notification = Notification::decode(&args).unwrap();
        assert_eq!(notification.category, 1);
        assert_eq!(notification.output_id, 2);
        assert_eq!(notification.pid, 9);
        assert_eq!(notification.attribute_state, 11);
    }

    #[test]
    fn test_is_success() {
        assert!(is_success(&[Value::Int32(1)]));
        assert!(is_success(&[Value::Int32(-1)]));
        assert!(!is_success(&[Value::Int32(0)]));
        assert!(!is_success(&[]));
        assert!(!is_success(&[Value::Uint32(1)]));
    }
}
