use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A decoded push event.
///
/// Envelopes are immutable once built. The payload sits behind an [`Arc`] so
/// fanning one envelope out to many subscribers never copies it, and
/// subscribers only ever see it by shared reference.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    event_type: String,
    data: Arc<Value>,
    timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Creates an envelope from its parts.
    pub fn new(event_type: impl Into<String>, data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Arc::new(data),
            timestamp,
        }
    }

    /// The routing key, e.g. `"update_available"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The opaque payload as received.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Server timestamp, or receipt time when the message carried none.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns `true` if this envelope has the given type.
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// Deserializes the payload into the given type.
    ///
    /// The envelope itself never interprets `data`; this is for consumers
    /// that know what a given event kind carries.
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.data.as_ref())
    }
}
