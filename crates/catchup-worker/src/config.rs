//! Environment configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_LISTENER_NAME: &str = "event-log";
const DEFAULT_LOCK_TTL_SECS: u64 = 5;
const DEFAULT_DEDUP_WINDOW: usize = 100;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Worker settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Postgres connection string of the event store.
    pub database_url: String,
    /// Redis connection string for the cluster lock and dedup window.
    pub redis_url: String,
    /// AMQP connection string of the broker.
    pub amqp_url: String,
    /// Projection name. Names the broker queue, the lock and the dedup key.
    pub listener_name: String,
    /// Event types the projection receives.
    pub event_types: Vec<String>,
    /// How far back the history replay starts. `None` replays everything.
    pub replay_lookback_hours: Option<i64>,
    /// Time to live of the listener lock.
    pub lock_ttl: Duration,
    /// Number of recent event ids remembered by the dedup window.
    pub dedup_window: usize,
    /// Size of the Postgres pool.
    pub db_max_connections: u32,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{key} environment variable must be set")))
        };

        let event_types: Vec<String> = required("LISTENER_EVENT_TYPES")?
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        if event_types.is_empty() {
            return Err(AppError::Config(
                "LISTENER_EVENT_TYPES must name at least one event type".into(),
            ));
        }

        let replay_lookback_hours = parse_optional::<i64>(&lookup, "REPLAY_LOOKBACK_HOURS")?;
        if replay_lookback_hours.is_some_and(|hours| hours <= 0) {
            return Err(AppError::Config(
                "REPLAY_LOOKBACK_HOURS must be positive".into(),
            ));
        }

        let lock_ttl_secs =
            parse_optional(&lookup, "LOCK_TTL_SECS")?.unwrap_or(DEFAULT_LOCK_TTL_SECS);
        if lock_ttl_secs == 0 {
            return Err(AppError::Config("LOCK_TTL_SECS must be positive".into()));
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            amqp_url: required("AMQP_URL")?,
            listener_name: lookup("LISTENER_NAME")
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LISTENER_NAME.to_owned()),
            event_types,
            replay_lookback_hours,
            lock_ttl: Duration::from_secs(lock_ttl_secs),
            dedup_window: parse_optional(&lookup, "DEDUP_WINDOW")?
                .unwrap_or(DEFAULT_DEDUP_WINDOW),
            db_max_connections: parse_optional(&lookup, "DB_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        })
    }
}

fn parse_optional<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| AppError::Config(format!("{key} is invalid: {e}")))
        })
        .transpose()
}
