//! Raw message → [`EventEnvelope`] validation.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::envelope::EventEnvelope;

/// Default upper bound for a single inbound message (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Why a raw message could not become an envelope.
///
/// A rejection only ever drops the one message; it says nothing about the
/// health of the connection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejected {
    #[error("empty message")]
    Empty,

    #[error("message too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing `type` field")]
    MissingType,

    #[error("`type` field is not a string")]
    InvalidType,

    #[error("`type` field is empty")]
    EmptyType,
}

/// Turns raw wire messages into envelopes.
///
/// Only `type` is validated. `timestamp` is honoured when it parses (RFC 3339
/// or Unix milliseconds) and replaced with receipt time otherwise. `data`
/// becomes the payload; without it, whatever other top-level fields the
/// message has are kept as the payload instead.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    max_message_size: usize,
}

impl EventDecoder {
    /// Creates a decoder rejecting messages larger than `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Size limit in bytes.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Decodes a message received now.
    pub fn decode(&self, raw: &str) -> Result<EventEnvelope, Rejected> {
        self.decode_at(raw, Utc::now())
    }

    /// Decodes a message received at `received_at`.
    pub fn decode_at(
        &self,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<EventEnvelope, Rejected> {
        if raw.len() > self.max_message_size {
            return Err(Rejected::TooLarge {
                size: raw.len(),
                limit: self.max_message_size,
            });
        }
        if raw.trim().is_empty() {
            return Err(Rejected::Empty);
        }

        let value: Value =
            serde_json::from_str(raw).map_err(|e| Rejected::Malformed(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(Rejected::NotAnObject);
        };

        let event_type = match fields.remove("type") {
            None | Some(Value::Null) => return Err(Rejected::MissingType),
            Some(Value::String(t)) if t.trim().is_empty() => return Err(Rejected::EmptyType),
            Some(Value::String(t)) => t,
            Some(_) => return Err(Rejected::InvalidType),
        };

        let timestamp = match fields.remove("timestamp") {
            None | Some(Value::Null) => received_at,
            Some(raw_ts) => parse_timestamp(&raw_ts).unwrap_or_else(|| {
                debug!(
                    event_type = %event_type,
                    timestamp = %raw_ts,
                    "unparseable timestamp, using receipt time"
                );
                received_at
            }),
        };

        let data = match fields.remove("data") {
            Some(data) => data,
            None => remaining_payload(fields),
        };

        Ok(EventEnvelope::new(event_type, data, timestamp))
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn remaining_payload(fields: Map<String, Value>) -> Value {
    if fields.is_empty() {
        Value::Null
    } else {
        Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn decodes_type_data_and_timestamp() {
        let raw = r#"{"type":"update_available","data":{"container":"web"},"timestamp":"2024-05-01T12:00:00Z"}"#;
        let env = EventDecoder::default().decode_at(raw, received()).unwrap();
        assert_eq!(env.event_type(), "update_available");
        assert_eq!(env.data()["container"], "web");
        assert_eq!(
            env.timestamp(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn epoch_millis_timestamp() {
        let raw = r#"{"type":"status_changed","timestamp":1714564800000}"#;
        let env = EventDecoder::default().decode_at(raw, received()).unwrap();
        assert_eq!(
            env.timestamp(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_timestamp_uses_receipt_time() {
        let env = EventDecoder::default()
            .decode_at(r#"{"type":"status_changed"}"#, received())
            .unwrap();
        assert_eq!(env.timestamp(), received());
        assert!(env.data().is_null());
    }

    #[test]
    fn bad_timestamp_falls_back_to_receipt_time() {
        let raw = r#"{"type":"status_changed","timestamp":"yesterday-ish"}"#;
        let env = EventDecoder::default().decode_at(raw, received()).unwrap();
        assert_eq!(env.timestamp(), received());
    }

    #[test]
    fn payload_falls_back_to_remaining_fields() {
        let raw = r#"{"type":"container_restarted","container":"db","reason":"oom"}"#;
        let env = EventDecoder::default().decode_at(raw, received()).unwrap();
        assert_eq!(
            env.data(),
            &serde_json::json!({"container": "db", "reason": "oom"})
        );
    }

    #[test]
    fn unknown_type_still_decodes() {
        let env = EventDecoder::default()
            .decode(r#"{"type":"kind_from_the_future","data":[1,2]}"#)
            .unwrap();
        assert_eq!(env.event_type(), "kind_from_the_future");
    }

    #[test]
    fn rejects_missing_type() {
        let err = EventDecoder::default()
            .decode(r#"{"data":{"container":"web"}}"#)
            .unwrap_err();
        assert_eq!(err, Rejected::MissingType);
        assert_eq!(err.to_string(), "missing `type` field");
    }

    #[test]
    fn rejects_null_empty_and_non_string_type() {
        let d = EventDecoder::default();
        assert_eq!(d.decode(r#"{"type":null}"#).unwrap_err(), Rejected::MissingType);
        assert_eq!(d.decode(r#"{"type":"  "}"#).unwrap_err(), Rejected::EmptyType);
        assert_eq!(d.decode(r#"{"type":7}"#).unwrap_err(), Rejected::InvalidType);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = EventDecoder::default().decode("not valid json {{{").unwrap_err();
        assert!(matches!(err, Rejected::Malformed(_)));
    }

    #[test]
    fn rejects_non_object() {
        let d = EventDecoder::default();
        assert_eq!(d.decode("[1,2,3]").unwrap_err(), Rejected::NotAnObject);
        assert_eq!(d.decode(r#""update_available""#).unwrap_err(), Rejected::NotAnObject);
    }

    #[test]
    fn rejects_blank_message() {
        assert_eq!(EventDecoder::default().decode("  \n").unwrap_err(), Rejected::Empty);
    }

    #[test]
    fn rejects_oversized_message() {
        let d = EventDecoder::new(16);
        let raw = r#"{"type":"status_changed"}"#;
        assert_eq!(
            d.decode(raw).unwrap_err(),
            Rejected::TooLarge {
                size: raw.len(),
                limit: 16
            }
        );
    }
}
