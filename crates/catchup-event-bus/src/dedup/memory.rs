use std::collections::VecDeque;

use async_trait::async_trait;
use catchup_core::event::Event;
use tokio::sync::Mutex;
use tracing::trace;

use super::{DedupError, EventCallback, EventDeduplicator};

/// Process-local window of the last `buffer_size` event ids.
///
/// Concurrent batches on one instance run one after another. Not shared
/// between processes; use `RedisDeduplicator` for that. Events without an id
/// are always dispatched and never recorded.
#[derive(Debug)]
pub struct MemoryDeduplicator {
    buffer_size: usize,
    recent: Mutex<VecDeque<String>>,
}

impl MemoryDeduplicator {
    /// Creates a window holding `buffer_size` ids (at least one).
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            buffer_size,
            recent: Mutex::new(VecDeque::with_capacity(buffer_size)),
        }
    }
}

#[async_trait]
impl<E: Event> EventDeduplicator<E> for MemoryDeduplicator {
    async fn deduplicate(
        &self,
        events: Vec<E>,
        callback: &dyn EventCallback<E>,
    ) -> Result<(), DedupError> {
        let mut recent = self.recent.lock().await;
        for event in events {
            let event_id = event.event_id().to_owned();
            if !event_id.is_empty() && recent.contains(&event_id) {
                trace!(%event_id, "duplicate skipped");
                continue;
            }
            callback.call(event).await.map_err(DedupError::Callback)?;
            if event_id.is_empty() {
                continue;
            }
            if recent.len() == self.buffer_size {
                recent.pop_front();
            }
            recent.push_back(event_id);
        }
        Ok(())
    }
}
