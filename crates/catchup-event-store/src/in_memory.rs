//! In-memory implementation of the `EventStore` trait.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use catchup_core::clock::{Clock, SystemClock};
use catchup_core::error::EventStoreError;
use catchup_core::event::StreamKey;
use catchup_core::store::{EventStore, ReplayHandler, ReplayOptions};
use catchup_core::stream::{NewStreamEvent, Stream, StreamEvent, seal_batch};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    streams: HashMap<StreamKey, Stream>,
    events: HashMap<StreamKey, Vec<StreamEvent>>,
    event_keys: HashSet<(String, String)>,
}

/// Event store held in process memory. Appends are atomic with respect to
/// each other; nothing survives a restart.
pub struct InMemoryEventStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl InMemoryEventStore {
    /// Creates an empty store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store whose append time comes from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replay_page(
        &self,
        event_types: &[String],
        since: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Vec<StreamEvent> {
        let state = self.state();
        let mut matching: Vec<&StreamEvent> = state
            .events
            .values()
            .flatten()
            .filter(|e| event_types.contains(&e.event_type) && e.event_time > since)
            .collect();
        matching.sort_by(|a, b| {
            (a.event_time, a.sequence_no, &a.stream_type, &a.stream_id).cmp(&(
                b.event_time,
                b.sequence_no,
                &b.stream_type,
                &b.stream_id,
            ))
        });
        matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("streams", &self.state().streams.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load(&self, stream_key: &StreamKey) -> Result<Vec<StreamEvent>, EventStoreError> {
        Ok(self
            .state()
            .events
            .get(stream_key)
            .cloned()
            .unwrap_or_default())
    }

    #[instrument(
        skip(self, stream_key, events),
        fields(stream = %stream_key, event_count = events.len()),
        err
    )]
    async fn save(
        &self,
        stream_key: &StreamKey,
        expected_revision: i64,
        events: Vec<NewStreamEvent>,
    ) -> Result<Vec<StreamEvent>, EventStoreError> {
        let now = self.clock.now();
        let correlation_id = Uuid::new_v4().to_string();

        let mut state = self.state();
        let mut stream = state
            .streams
            .get(stream_key)
            .cloned()
            .unwrap_or_else(|| Stream::new(stream_key.clone()));
        stream.check_revision(expected_revision)?;
        if events.is_empty() {
            state.streams.entry(stream_key.clone()).or_insert(stream);
            return Ok(Vec::new());
        }

        let sealed = seal_batch(stream_key, expected_revision, now, &correlation_id, events)?;
        if let Some(taken) = sealed
            .iter()
            .find(|e| state.event_keys.contains(&(e.event_id.clone(), e.event_type.clone())))
        {
            return Err(EventStoreError::DuplicateEventId(taken.event_id.clone()));
        }

        for event in &sealed {
            state
                .event_keys
                .insert((event.event_id.clone(), event.event_type.clone()));
        }
        state
            .events
            .entry(stream_key.clone())
            .or_default()
            .extend(sealed.iter().cloned());
        stream.advance(&sealed);
        debug!(latest_version = stream.latest_version, "events appended");
        state.streams.insert(stream_key.clone(), stream);

        Ok(sealed)
    }

    async fn replay_events_by_type(
        &self,
        event_types: &[String],
        since: DateTime<Utc>,
        handler: &dyn ReplayHandler,
        options: ReplayOptions,
    ) -> Result<(), EventStoreError> {
        let batch_size = options.effective_batch_size();
        let mut offset = 0;
        loop {
            let page = self.replay_page(event_types, since, offset, batch_size);
            let page_len = page.len();
            if page_len > 0 {
                handler.handle(page).await.map_err(EventStoreError::Replay)?;
            }
            if page_len < batch_size {
                return Ok(());
            }
            offset += page_len;
        }
    }
}
