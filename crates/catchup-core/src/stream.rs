//! Streams, persisted stream events and batch sealing.

use std::collections::HashSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventStoreError;
use crate::event::StreamKey;

/// Per-stream bookkeeping row.
///
/// `latest_version` equals the number of events in the stream and the
/// `sequence_no` of the next event to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    /// The stream this row tracks.
    pub stream_key: StreamKey,
    /// Count of events appended so far.
    pub latest_version: i64,
}

impl Stream {
    /// Creates an empty stream.
    #[must_use]
    pub fn new(stream_key: StreamKey) -> Self {
        Self {
            stream_key,
            latest_version: 0,
        }
    }

    /// Verifies the caller's expected revision against the stream.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::ConcurrencyConflict` on mismatch.
    pub fn check_revision(&self, expected_revision: i64) -> Result<(), EventStoreError> {
        if self.latest_version == expected_revision {
            Ok(())
        } else {
            Err(EventStoreError::ConcurrencyConflict {
                stream_key: self.stream_key.clone(),
                expected: expected_revision,
                actual: self.latest_version,
            })
        }
    }

    /// Moves the version past the last of `sealed`.
    pub fn advance(&mut self, sealed: &[StreamEvent]) {
        if let Some(last) = sealed.last() {
            self.latest_version = last.sequence_no + 1;
        }
    }
}

/// An immutable, persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Type of the owning stream.
    pub stream_type: String,
    /// Id of the owning stream.
    pub stream_id: String,
    /// Zero-based, contiguous position in the stream.
    pub sequence_no: i64,
    /// Globally unique event id.
    pub event_id: String,
    /// Discriminant used by the `EventMapper`.
    pub event_type: String,
    /// Raw schema version of the payload.
    pub event_version: i32,
    /// Time of the event.
    pub event_time: DateTime<Utc>,
    /// Id shared by every event appended in the same call.
    pub correlation_id: String,
    /// Complete event JSON, envelope included.
    pub payload: serde_json::Value,
}

impl StreamEvent {
    /// Returns the key of the owning stream.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.stream_type.clone(), self.stream_id.clone())
    }
}

/// An event on its way into the store. Unset fields are defaulted on append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStreamEvent {
    /// The stream the event claims to belong to.
    pub stream_key: StreamKey,
    /// Explicit event id, or `None` to have one generated.
    pub event_id: Option<String>,
    /// Discriminant used by the `EventMapper`.
    pub event_type: String,
    /// Raw schema version of the payload.
    pub event_version: i32,
    /// Explicit event time, or `None` for the append time.
    pub event_time: Option<DateTime<Utc>>,
    /// Explicit correlation id, or `None` for the batch's id.
    pub correlation_id: Option<String>,
    /// JSON object with the event's fields.
    pub payload: serde_json::Value,
}

impl NewStreamEvent {
    /// Creates a new event with version 1 and no explicit identity fields.
    #[must_use]
    pub fn new(
        stream_key: StreamKey,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            stream_key,
            event_id: None,
            event_type: event_type.into(),
            event_version: 1,
            event_time: None,
            correlation_id: None,
            payload,
        }
    }

    /// Sets an explicit event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
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
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the payload schema version.
    #[must_use]
    pub fn with_event_version(mut self, event_version: i32) -> Self {
        self.event_version = event_version;
        self
    }
}

/// Applies the append rules to a batch bound for `stream_key`.
///
/// Events get `sequence_no = expected_revision + i`, a generated id when
/// none is set, `now` as their time and `correlation_id` as their
/// correlation when unset. The final envelope fields are written into each
/// payload object. Times are truncated to microseconds to match the storage
/// precision.
///
/// # Errors
///
/// Returns `StreamKeyMismatch` if an event names another stream,
/// `DuplicateEventId` if the batch repeats an id and `InvalidPayload` if a
/// payload is not a JSON object.
pub fn seal_batch(
    stream_key: &StreamKey,
    expected_revision: i64,
    now: DateTime<Utc>,
    correlation_id: &str,
    events: Vec<NewStreamEvent>,
) -> Result<Vec<StreamEvent>, EventStoreError> {
    let mut seen = HashSet::with_capacity(events.len());
    let mut sealed = Vec::with_capacity(events.len());
    let mut sequence_no = expected_revision;

    for event in events {
        let event_id = event
            .event_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if event.stream_key != *stream_key {
            return Err(EventStoreError::StreamKeyMismatch {
                event_id,
                expected: stream_key.clone(),
                actual: event.stream_key,
            });
        }
        if !seen.insert(event_id.clone()) {
            return Err(EventStoreError::DuplicateEventId(event_id));
        }

        let event_time = event.event_time.unwrap_or(now).trunc_subsecs(6);
        let correlation_id = event
            .correlation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| correlation_id.to_owned());

        let serde_json::Value::Object(mut fields) = event.payload else {
            return Err(EventStoreError::InvalidPayload(format!(
                "payload of event {event_id} must be a JSON object"
            )));
        };
        fields.insert("event_id".into(), event_id.clone().into());
        fields.insert("event_type".into(), event.event_type.clone().into());
        fields.insert("event_version".into(), event.event_version.into());
        fields.insert("event_time".into(), serde_json::to_value(event_time)?);
        fields.insert("correlation_id".into(), correlation_id.clone().into());
        fields.insert("stream_type".into(), stream_key.stream_type.clone().into());
        fields.insert("stream_id".into(), stream_key.stream_id.clone().into());
        fields.insert("sequence_no".into(), sequence_no.into());

        sealed.push(StreamEvent {
            stream_type: stream_key.stream_type.clone(),
            stream_id: stream_key.stream_id.clone(),
            sequence_no,
            event_id,
            event_type: event.event_type,
            event_version: event.event_version,
            event_time,
            correlation_id,
            payload: serde_json::Value::Object(fields),
        });
        sequence_no += 1;
    }

    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn key() -> StreamKey {
        StreamKey::new("user", "1")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    fn new_event() -> NewStreamEvent {
        NewStreamEvent::new(key(), "user-created", json!({"name": "Ada"}))
    }

    #[test]
    fn test_check_revision_rejects_stale_revision() {
        let stream = Stream {
            stream_key: key(),
            latest_version: 2,
        };

        assert!(stream.check_revision(2).is_ok());
        match stream.check_revision(1) {
            Err(EventStoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_seal_batch_assigns_contiguous_sequence_numbers() {
        let sealed = seal_batch(&key(), 3, now(), "corr", vec![new_event(), new_event()]).unwrap();

        assert_eq!(sealed[0].sequence_no, 3);
        assert_eq!(sealed[1].sequence_no, 4);

        let mut stream = Stream {
            stream_key: key(),
            latest_version: 3,
        };
        stream.advance(&sealed);
        assert_eq!(stream.latest_version, 5);
    }

    #[test]
    fn test_seal_batch_defaults_identity_fields() {
        let sealed = seal_batch(&key(), 0, now(), "corr", vec![new_event(), new_event()]).unwrap();

        assert!(!sealed[0].event_id.is_empty());
        assert_ne!(sealed[0].event_id, sealed[1].event_id);
        assert!(sealed.iter().all(|e| e.correlation_id == "corr"));
        assert!(sealed.iter().all(|e| e.event_time == now()));
    }

    #[test]
    fn test_seal_batch_keeps_explicit_identity_fields() {
        let time = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let event = new_event()
            .with_event_id("e-1")
            .with_event_time(time)
            .with_correlation_id("mine");

        let sealed = seal_batch(&key(), 0, now(), "corr", vec![event]).unwrap();

        assert_eq!(sealed[0].event_id, "e-1");
        assert_eq!(sealed[0].event_time, time);
        assert_eq!(sealed[0].correlation_id, "mine");
    }

    #[test]
    fn test_seal_batch_writes_envelope_into_payload() {
        let sealed = seal_batch(&key(), 7, now(), "corr", vec![new_event()]).unwrap();
        let payload = &sealed[0].payload;

        assert_eq!(payload["name"], json!("Ada"));
        assert_eq!(payload["event_id"], json!(sealed[0].event_id));
        assert_eq!(payload["event_type"], json!("user-created"));
        assert_eq!(payload["stream_type"], json!("user"));
        assert_eq!(payload["stream_id"], json!("1"));
        assert_eq!(payload["sequence_no"], json!(7));
        assert_eq!(payload["correlation_id"], json!("corr"));
    }

    #[test]
    fn test_seal_batch_rejects_foreign_stream_key() {
        let foreign = NewStreamEvent::new(StreamKey::new("group", "1"), "group-created", json!({}));

        let result = seal_batch(&key(), 0, now(), "corr", vec![new_event(), foreign]);

        assert!(matches!(
            result,
            Err(EventStoreError::StreamKeyMismatch { .. })
        ));
    }

    #[test]
    fn test_seal_batch_rejects_duplicate_ids() {
        let events = vec![new_event().with_event_id("e-1"), new_event().with_event_id("e-1")];

        let result = seal_batch(&key(), 0, now(), "corr", events);

        match result {
            Err(EventStoreError::DuplicateEventId(id)) => assert_eq!(id, "e-1"),
            other => panic!("expected DuplicateEventId, got {other:?}"),
        }
    }

    #[test]
    fn test_seal_batch_rejects_non_object_payload() {
        let event = NewStreamEvent::new(key(), "user-created", json!([1, 2]));

        let result = seal_batch(&key(), 0, now(), "corr", vec![event]);

        assert!(matches!(result, Err(EventStoreError::InvalidPayload(_))));
    }

    #[test]
    fn test_seal_batch_truncates_to_microseconds() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();

        let sealed = seal_batch(&key(), 0, precise, "corr", vec![new_event()]).unwrap();

        assert_eq!(sealed[0].event_time.timestamp_subsec_nanos(), 123_456_000);
    }
}
