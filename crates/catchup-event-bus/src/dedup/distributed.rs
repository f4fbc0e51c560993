//! Redis-backed dedup window shared by every process using the same key.
//!
//! The window is a list trimmed to the last `buffer_size` ids. Recording runs
//! as `MULTI RPUSH.. LTRIM EXEC` under `WATCH`, so a writer whose view of the
//! window went stale re-reads it and tries again.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use catchup_core::event::Event;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};

use super::{DedupError, EventCallback, EventDeduplicator};

/// Attempts made to record a batch before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Dedup window kept in a Redis list.
///
/// Calls share one dedicated connection, opened on first use and held for
/// the whole call since `WATCH` state belongs to the connection. Clones share
/// it too. A connection that failed is dropped and reopened by the next call.
#[derive(Clone)]
pub struct RedisDeduplicator {
    client: redis::Client,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
    key: String,
    buffer_size: usize,
    max_attempts: u32,
}

impl RedisDeduplicator {
    /// Creates a window of `buffer_size` ids (at least one) stored at `key`.
    #[must_use]
    pub fn new(client: redis::Client, key: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            client,
            conn: Arc::new(Mutex::new(None)),
            key: key.into(),
            buffer_size: buffer_size.max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets how many times recording is attempted while other writers keep
    /// changing the window.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The window's storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn window_start(&self) -> isize {
        -isize::try_from(self.buffer_size).unwrap_or(isize::MAX)
    }

    async fn watch_window(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<HashSet<String>, DedupError> {
        redis::cmd("WATCH")
            .arg(&self.key)
            .query_async::<_, ()>(conn)
            .await?;
        let window: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(self.window_start())
            .arg(-1)
            .query_async(conn)
            .await?;
        Ok(window.into_iter().collect())
    }

    /// Appends `ids` and trims the window. `None` means the watched key
    /// changed and nothing was written.
    async fn record(
        &self,
        conn: &mut MultiplexedConnection,
        ids: &[&String],
    ) -> Result<Option<()>, DedupError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in ids {
            pipe.rpush(&self.key, *id).ignore();
        }
        pipe.ltrim(&self.key, self.window_start(), -1).ignore();
        Ok(pipe.query_async::<_, Option<()>>(conn).await?)
    }

    /// Dispatches unseen events and records them on `conn`.
    async fn dedup_on<E: Event>(
        &self,
        conn: &mut MultiplexedConnection,
        events: Vec<E>,
        callback: &dyn EventCallback<E>,
    ) -> Result<(), DedupError> {
        let mut window = self.watch_window(conn).await?;

        let mut dispatched: Vec<String> = Vec::new();
        let mut failure = None;
        for event in events {
            let event_id = event.event_id().to_owned();
            if !event_id.is_empty() && (window.contains(&event_id) || dispatched.contains(&event_id))
            {
                trace!(%event_id, "duplicate skipped");
                continue;
            }
            if let Err(err) = callback.call(event).await {
                failure = Some(err);
                break;
            }
            if !event_id.is_empty() {
                dispatched.push(event_id);
            }
        }

        let mut attempts = 1;
        loop {
            let unrecorded: Vec<&String> = dispatched
                .iter()
                .filter(|id| !window.contains(*id))
                .collect();
            if unrecorded.is_empty() {
                redis::cmd("UNWATCH")
                    .query_async::<_, ()>(conn)
                    .await?;
                break;
            }
            if self.record(conn, &unrecorded).await?.is_some() {
                debug!(recorded = unrecorded.len(), "dedup window updated");
                break;
            }
            if attempts >= self.max_attempts {
                return Err(DedupError::Contention {
                    key: self.key.clone(),
                    attempts,
                });
            }
            attempts += 1;
            debug!(attempts, "dedup window changed concurrently, retrying");
            window = self.watch_window(conn).await?;
        }

        failure.map_or(Ok(()), |err| Err(DedupError::Callback(err)))
    }
}

impl fmt::Debug for RedisDeduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDeduplicator")
            .field("key", &self.key)
            .field("buffer_size", &self.buffer_size)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Event> EventDeduplicator<E> for RedisDeduplicator {
    #[instrument(skip(self, events, callback), fields(key = %self.key, event_count = events.len()))]
    async fn deduplicate(
        &self,
        events: Vec<E>,
        callback: &dyn EventCallback<E>,
    ) -> Result<(), DedupError> {
        let mut slot = self.conn.lock().await;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                debug!("opening dedup connection");
                self.client.get_multiplexed_async_connection().await?
            }
        };
        let result = self.dedup_on(&mut conn, events, callback).await;
        if !matches!(result, Err(DedupError::Redis(_))) {
            *slot = Some(conn);
        }
        result
    }
}
