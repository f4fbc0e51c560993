//! In-process locker with the same contract as the Redis one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LockError;
use crate::lock::{Lock, LockOptions, Locker, new_token, retry_until_obtained};

#[derive(Debug)]
struct Entry {
    token: String,
    expires_at: Instant,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Longest lifetime a claim is given; larger TTLs are clamped to it.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

fn entries(entries: &Entries) -> MutexGuard<'_, HashMap<String, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Locker whose claims live in a shared map. Clones share the map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocker {
    entries: Entries,
}

impl InMemoryLocker {
    /// Creates a locker with no claims.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_claim(&self, key: &str, ttl: Duration, metadata: &str) -> Option<Box<dyn Lock>> {
        let now = Instant::now();
        let mut map = entries(&self.entries);
        if map.get(key).is_some_and(|entry| entry.expires_at > now) {
            return None;
        }
        let token = new_token();
        map.insert(
            key.to_owned(),
            Entry {
                token: token.clone(),
                expires_at: expiry(now, ttl),
            },
        );
        Some(Box::new(InMemoryLock {
            entries: Arc::clone(&self.entries),
            key: key.to_owned(),
            token,
            metadata: metadata.to_owned(),
        }))
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    async fn obtain(
        &self,
        key: &str,
        ttl: Duration,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Lock>, LockError> {
        retry_until_obtained(key, options, cancel, || {
            std::future::ready(Ok::<_, LockError>(self.try_claim(
                key,
                ttl,
                &options.metadata,
            )))
        })
        .await
    }
}

#[derive(Debug)]
struct InMemoryLock {
    entries: Entries,
    key: String,
    token: String,
    metadata: String,
}

impl InMemoryLock {
    fn held_entry<'a>(
        &self,
        map: &'a mut HashMap<String, Entry>,
    ) -> Result<&'a mut Entry, LockError> {
        match map.get_mut(&self.key) {
            Some(entry) if entry.token == self.token && entry.expires_at > Instant::now() => {
                Ok(entry)
            }
            _ => Err(LockError::NotHeld(self.key.clone())),
        }
    }
}

#[async_trait]
impl Lock for InMemoryLock {
    fn key(&self) -> &str {
        &self.key
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn metadata(&self) -> &str {
        &self.metadata
    }

    async fn ttl(&self) -> Result<Option<Duration>, LockError> {
        let mut map = entries(&self.entries);
        Ok(self
            .held_entry(&mut map)
            .ok()
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn refresh(&self, ttl: Duration) -> Result<(), LockError> {
        let mut map = entries(&self.entries);
        let entry = self.held_entry(&mut map)?;
        entry.expires_at = expiry(Instant::now(), ttl);
        Ok(())
    }

    async fn release(&self) -> Result<(), LockError> {
        let mut map = entries(&self.entries);
        self.held_entry(&mut map)?;
        map.remove(&self.key);
        Ok(())
    }
}
