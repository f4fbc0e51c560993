//! Lock error types.

use thiserror::Error;

/// Errors raised while obtaining or operating on a lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock is held by someone else and the retry strategy gave up.
    #[error("lock {0} not obtained")]
    NotObtained(String),

    /// The lock expired or was taken over by another owner.
    #[error("lock {0} is no longer held")]
    NotHeld(String),

    /// The caller cancelled while waiting for the lock.
    #[error("cancelled while obtaining lock {0}")]
    Cancelled(String),

    /// The Redis round trip failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
