//! Worker error types.

use catchup_cluster_lock::LockError;
use catchup_core::error::MapperError;
use catchup_event_bus::{BrokerError, ListenerError};
use thiserror::Error;

/// Startup and runtime errors for the worker.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A schema migration failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The Redis URL was rejected.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The broker connection or topology failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The cluster lock provider could not be reached.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// An event type could not be registered.
    #[error("mapper error: {0}")]
    Mapper(#[from] MapperError),

    /// The listener stopped with an error.
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_the_problem() {
        let err = AppError::Config("DATABASE_URL must be set".into());
        assert_eq!(
            err.to_string(),
            "configuration error: DATABASE_URL must be set"
        );
    }

    #[test]
    fn test_listener_error_converts() {
        let err = AppError::from(ListenerError::NotInitialized);
        assert!(matches!(err, AppError::Listener(ListenerError::NotInitialized)));
    }
}
