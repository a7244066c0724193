//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Value and channel bus shared by components and calculators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use ems_common::time::now_ms;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// No payload; the value is unknown.
    Empty,
    /// Boolean flag.
    Boolean,
    /// 64-bit float.
    Double,
    /// 64-bit signed integer.
    Long,
    /// Free text.
    Text,
}

/// Payload carried by a [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    /// Unknown value.
    Empty,
    /// Boolean flag.
    Boolean(bool),
    /// 64-bit float.
    Double(f64),
    /// 64-bit signed integer.
    Long(i64),
    /// Free text.
    Text(String),
}

/// Immutable, typed scalar stamped with its capture time in epoch milliseconds.
///
/// Equality covers the type, the timestamp and the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    timestamp: i64,
    payload: Payload,
}

impl Value {
    /// The distinguished unknown value returned for channels without data.
    pub fn unknown() -> Self {
        Self {
            timestamp: 0,
            payload: Payload::Empty,
        }
    }

    /// Construct a value from a payload and timestamp.
    pub fn new(payload: Payload, timestamp: i64) -> Self {
        Self { timestamp, payload }
    }

    /// Boolean value captured at `timestamp`.
    pub fn boolean(value: bool, timestamp: i64) -> Self {
        Self::new(Payload::Boolean(value), timestamp)
    }

    /// Double value captured at `timestamp`.
    pub fn double(value: f64, timestamp: i64) -> Self {
        Self::new(Payload::Double(value), timestamp)
    }

    /// Long value captured at `timestamp`.
    pub fn long(value: i64, timestamp: i64) -> Self {
        Self::new(Payload::Long(value), timestamp)
    }

    /// Text value captured at `timestamp`.
    pub fn text(value: impl Into<String>, timestamp: i64) -> Self {
        Self::new(Payload::Text(value.into()), timestamp)
    }

    /// Double value stamped with the current wall-clock time.
    pub fn double_now(value: f64) -> Self {
        Self::double(value, now_ms())
    }

    /// Boolean value stamped with the current wall-clock time.
    pub fn boolean_now(value: bool) -> Self {
        Self::boolean(value, now_ms())
    }

    /// Capture time in epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Type tag of the payload.
    pub fn value_type(&self) -> ValueType {
        match self.payload {
            Payload::Empty => ValueType::Empty,
            Payload::Boolean(_) => ValueType::Boolean,
            Payload::Double(_) => ValueType::Double,
            Payload::Long(_) => ValueType::Long,
            Payload::Text(_) => ValueType::Text,
        }
    }

    /// Whether this is the unknown value (no payload).
    pub fn is_unknown(&self) -> bool {
        matches!(self.payload, Payload::Empty)
    }

    /// Numeric view. Booleans map to 1/0; unknown and text values have none.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.payload {
            Payload::Double(value) => Some(*value),
            Payload::Long(value) => Some(*value as f64),
            Payload::Boolean(value) => Some(if *value { 1.0 } else { 0.0 }),
            Payload::Empty | Payload::Text(_) => None,
        }
    }

    /// Integer view. Doubles are truncated toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match &self.payload {
            Payload::Long(value) => Some(*value),
            Payload::Double(value) => Some(value.trunc() as i64),
            Payload::Boolean(value) => Some(i64::from(*value)),
            Payload::Empty | Payload::Text(_) => None,
        }
    }

    /// Boolean view. Numbers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match &self.payload {
            Payload::Boolean(value) => Some(*value),
            Payload::Long(value) => Some(*value != 0),
            Payload::Double(value) => Some(*value != 0.0),
            Payload::Empty | Payload::Text(_) => None,
        }
    }

    /// Text view, only for text payloads.
    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Empty => write!(f, "unknown"),
            Payload::Boolean(value) => write!(f, "{value}@{}", self.timestamp),
            Payload::Double(value) => write!(f, "{value}@{}", self.timestamp),
            Payload::Long(value) => write!(f, "{value}@{}", self.timestamp),
            Payload::Text(value) => write!(f, "{value:?}@{}", self.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_covers_type_timestamp_and_payload() {
        assert_eq!(Value::double(1.0, 10), Value::double(1.0, 10));
        assert_ne!(Value::double(1.0, 10), Value::double(1.0, 11));
        assert_ne!(Value::double(1.0, 10), Value::long(1, 10));
        assert_ne!(Value::boolean(true, 10), Value::boolean(false, 10));
    }

    #[test]
    fn unknown_value_has_no_numeric_view() {
        let unknown = Value::unknown();
        assert!(unknown.is_unknown());
        assert_eq!(unknown.value_type(), ValueType::Empty);
        assert_eq!(unknown.as_f64(), None);
        assert_eq!(unknown.to_string(), "unknown");
    }

    #[test]
    fn boolean_converts_to_numbers() {
        let flag = Value::boolean(true, 5);
        assert_eq!(flag.as_f64(), Some(1.0));
        assert_eq!(flag.as_i64(), Some(1));
        assert_eq!(Value::long(0, 5).as_bool(), Some(false));
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Value::double(59.5, 900_000)).expect("serialize");
        assert_eq!(json["payload"]["type"], "double");
        assert_eq!(json["timestamp"], 900_000);
    }
}
