//! Event envelope and the `Event` trait.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::NewStreamEvent;

/// Identifies one ordered event sequence, e.g. `("user", "<uuid>")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// The kind of aggregate owning the stream.
    pub stream_type: String,
    /// The aggregate instance identifier.
    pub stream_id: String,
}

impl StreamKey {
    /// Creates a new `StreamKey`.
    #[must_use]
    pub fn new(stream_type: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            stream_type: stream_type.into(),
            stream_id: stream_id.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_type, self.stream_id)
    }
}

fn default_event_version() -> i32 {
    1
}

/// Identity fields common to every event.
///
/// Serialized inline with the type-specific fields of an event, so a stored
/// payload carries its own envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique event id. Empty until the store assigns one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_id: String,
    /// Discriminant used by the `EventMapper`.
    pub event_type: String,
    /// Raw schema version of the payload.
    #[serde(default = "default_event_version")]
    pub event_version: i32,
    /// Time of the event. Defaults to the append transaction's time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    /// Id shared by every event appended in the same call.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    /// Type of the owning stream.
    #[serde(default)]
    pub stream_type: String,
    /// Id of the owning stream.
    #[serde(default)]
    pub stream_id: String,
    /// Zero-based position in the owning stream.
    #[serde(default)]
    pub sequence_no: i64,
}

impl EventEnvelope {
    /// Creates an envelope for a new, not yet persisted event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, stream_key: &StreamKey) -> Self {
        Self {
            event_id: String::new(),
            event_type: event_type.into(),
            event_version: default_event_version(),
            event_time: None,
            correlation_id: String::new(),
            stream_type: stream_key.stream_type.clone(),
            stream_id: stream_key.stream_id.clone(),
            sequence_no: 0,
        }
    }

    /// Sets an explicit event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Sets an explicit event time.
    #[must_use]
    pub fn with_event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = Some(event_time);
        self
    }

    /// Sets an explicit correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Sets the payload schema version.
    #[must_use]
    pub fn with_event_version(mut self, event_version: i32) -> Self {
        self.event_version = event_version;
        self
    }

    /// Returns the key of the owning stream.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.stream_type.clone(), self.stream_id.clone())
    }
}

/// Trait that every decoded event implements.
pub trait Event: fmt::Debug + Send + Sync + 'static {
    /// Returns the envelope of this event.
    fn envelope(&self) -> &EventEnvelope;

    /// Serializes the complete event (envelope and type-specific fields).
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if the event cannot be represented as JSON.
    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Returns the event id, empty if not yet assigned.
    fn event_id(&self) -> &str {
        &self.envelope().event_id
    }

    /// Returns the event type discriminant.
    fn event_type(&self) -> &str {
        &self.envelope().event_type
    }

    /// Returns the key of the stream this event belongs to.
    fn stream_key(&self) -> StreamKey {
        self.envelope().stream_key()
    }

    /// Converts this event into its pre-append form.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if the payload cannot be built.
    fn to_new_stream_event(&self) -> Result<NewStreamEvent, serde_json::Error> {
        let envelope = self.envelope();
        let mut event = NewStreamEvent::new(
            envelope.stream_key(),
            envelope.event_type.clone(),
            self.to_payload()?,
        )
        .with_event_version(envelope.event_version);
        if !envelope.event_id.is_empty() {
            event = event.with_event_id(envelope.event_id.clone());
        }
        if let Some(event_time) = envelope.event_time {
            event = event.with_event_time(event_time);
        }
        if !envelope.correlation_id.is_empty() {
            event = event.with_correlation_id(envelope.correlation_id.clone());
        }
        Ok(event)
    }
}

/// An event whose type-specific fields are kept as raw JSON.
///
/// Useful for consumers that react to every event type the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// The identity fields.
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// Every other field of the payload.
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Event for RawEvent {
    fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_stream_key_display() {
        assert_eq!(StreamKey::new("user", "abc").to_string(), "user/abc");
    }

    #[test]
    fn test_new_envelope_omits_unassigned_fields() {
        let envelope = EventEnvelope::new("user-created", &StreamKey::new("user", "1"));

        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            value,
            json!({
                "event_type": "user-created",
                "event_version": 1,
                "stream_type": "user",
                "stream_id": "1",
                "sequence_no": 0,
            })
        );
    }

    #[test]
    fn test_raw_event_splits_envelope_from_data() {
        let raw: RawEvent = serde_json::from_value(json!({
            "event_id": "e-1",
            "event_type": "user-renamed",
            "event_version": 2,
            "event_time": "2024-03-01T12:00:00Z",
            "correlation_id": "c-1",
            "stream_type": "user",
            "stream_id": "1",
            "sequence_no": 4,
            "name": "Ada",
        }))
        .unwrap();

        assert_eq!(raw.event_id(), "e-1");
        assert_eq!(raw.event_type(), "user-renamed");
        assert_eq!(raw.envelope.event_version, 2);
        assert_eq!(
            raw.envelope.event_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(raw.envelope.sequence_no, 4);
        assert_eq!(raw.data.len(), 1);
        assert_eq!(raw.data["name"], json!("Ada"));
    }

    #[test]
    fn test_to_new_stream_event_carries_explicit_envelope_fields() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let raw = RawEvent {
            envelope: EventEnvelope::new("user-created", &StreamKey::new("user", "1"))
                .with_event_id("e-1")
                .with_event_time(time)
                .with_event_version(3),
            data: serde_json::Map::new(),
        };

        let new_event = raw.to_new_stream_event().unwrap();

        assert_eq!(new_event.stream_key, StreamKey::new("user", "1"));
        assert_eq!(new_event.event_id.as_deref(), Some("e-1"));
        assert_eq!(new_event.event_time, Some(time));
        assert_eq!(new_event.event_version, 3);
        assert_eq!(new_event.correlation_id, None);
        assert_eq!(new_event.payload["event_type"], json!("user-created"));
    }
}
