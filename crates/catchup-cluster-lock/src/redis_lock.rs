//! Redis-backed locker.
//!
//! A lock is a single key set with `NX PX`, whose value is the owner's token
//! followed by the metadata. Refresh, release and TTL checks run as Lua
//! scripts that act only while the stored value still matches.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::LockError;
use crate::lock::{Lock, LockOptions, Locker, new_token, retry_until_obtained};

static RELEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"if redis.call("get", KEYS[1]) == ARGV[1] then return redis.call("del", KEYS[1]) else return 0 end"#,
    )
});

static REFRESH: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"if redis.call("get", KEYS[1]) == ARGV[1] then return redis.call("pexpire", KEYS[1], ARGV[2]) else return 0 end"#,
    )
});

static PTTL: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"if redis.call("get", KEYS[1]) == ARGV[1] then return redis.call("pttl", KEYS[1]) else return -3 end"#,
    )
});

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Locker backed by a Redis connection shared by every lock it hands out.
#[derive(Clone)]
pub struct RedisLocker {
    conn: ConnectionManager,
}

impl RedisLocker {
    /// Creates a locker on an existing connection.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Opens a managed connection for `client`.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Redis` if the connection cannot be established.
    pub async fn connect(client: redis::Client) -> Result<Self, LockError> {
        Ok(Self::new(ConnectionManager::new(client).await?))
    }
}

impl fmt::Debug for RedisLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLocker").finish_non_exhaustive()
    }
}

#[async_trait]
impl Locker for RedisLocker {
    #[instrument(skip(self, options, cancel), fields(ttl_ms = millis(ttl)))]
    async fn obtain(
        &self,
        key: &str,
        ttl: Duration,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Lock>, LockError> {
        let token = new_token();
        let value = format!("{token}{}", options.metadata);
        let ttl_ms = millis(ttl);

        retry_until_obtained(key, options, cancel, || {
            let mut conn = self.conn.clone();
            let token = token.clone();
            let value = value.clone();
            let metadata = options.metadata.clone();
            async move {
                let claimed: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(&value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await?;
                if claimed.is_none() {
                    debug!(key, "lock is held elsewhere");
                    return Ok(None);
                }
                let lock: Box<dyn Lock> = Box::new(RedisLock {
                    conn,
                    key: key.to_owned(),
                    token,
                    metadata,
                    value,
                });
                Ok::<_, LockError>(Some(lock))
            }
        })
        .await
    }
}

struct RedisLock {
    conn: ConnectionManager,
    key: String,
    token: String,
    metadata: String,
    value: String,
}

impl fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLock")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Lock for RedisLock {
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
        let mut conn = self.conn.clone();
        let remaining: i64 = PTTL
            .key(&self.key)
            .arg(&self.value)
            .invoke_async(&mut conn)
            .await?;
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }

    async fn refresh(&self, ttl: Duration) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let refreshed: i64 = REFRESH
            .key(&self.key)
            .arg(&self.value)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        if refreshed == 1 {
            Ok(())
        } else {
            Err(LockError::NotHeld(self.key.clone()))
        }
    }

    async fn release(&self) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = RELEASE
            .key(&self.key)
            .arg(&self.value)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 1 {
            debug!(key = %self.key, "lock released");
            Ok(())
        } else {
            Err(LockError::NotHeld(self.key.clone()))
        }
    }
}
