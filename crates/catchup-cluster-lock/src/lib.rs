//! Cluster-wide mutual exclusion.
//!
//! A `Locker` hands out TTL-bound `Lock`s whose ownership is proven by a
//! random token. `RedisLocker` coordinates across processes;
//! `InMemoryLocker` offers the same contract inside one process.

pub mod error;
pub mod lock;
pub mod memory;
pub mod redis_lock;
pub mod retry;

pub use error::LockError;
pub use lock::{Lock, LockOptions, Locker};
pub use memory::InMemoryLocker;
pub use redis_lock::RedisLocker;
pub use retry::{ExponentialBackoff, LimitRetry, LinearBackoff, NoRetry, RetryStrategy};
