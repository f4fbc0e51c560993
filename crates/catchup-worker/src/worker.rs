//! Wiring of the catch-up pipeline and the logging projection it drives.

use std::sync::Arc;

use catchup_cluster_lock::{LinearBackoff, LockOptions, RedisLocker};
use catchup_core::clock::{SystemClock, Watermark, full_history, lookback};
use catchup_core::error::{BoxError, MapperError};
use catchup_core::event::{Event, RawEvent};
use catchup_core::mapper::EventMapper;
use catchup_core::store::EventStore;
use catchup_event_bus::{
    AmqpBroker, BatchHandler, CatchUpDependencies, CatchUpListenerFactory,
    DeduplicatorFactory, EventDeduplicator, Listener, RedisDeduplicator,
};
use catchup_event_store::PgEventStore;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::AppError;

/// Delay between attempts to take the listener lock.
const LOCK_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Builds a mapper that decodes every configured type as a `RawEvent`.
///
/// # Errors
///
/// Returns `MapperError::AlreadyRegistered` if a type is listed twice.
pub fn raw_event_mapper(event_types: &[String]) -> Result<EventMapper<RawEvent>, MapperError> {
    let mut mapper = EventMapper::new();
    for event_type in event_types {
        mapper.register_json::<RawEvent>(event_type.as_str())?;
    }
    Ok(mapper)
}

/// Watermark trailing the system clock by `hours`, or the whole log.
///
/// # Errors
///
/// Returns `AppError::Config` if `hours` is out of range.
pub fn replay_watermark(hours: Option<i64>) -> Result<Watermark, AppError> {
    match hours {
        None => Ok(full_history()),
        Some(hours) => {
            let window = chrono::Duration::try_hours(hours).ok_or_else(|| {
                AppError::Config(format!("replay lookback of {hours} hours is out of range"))
            })?;
            Ok(lookback(Arc::new(SystemClock), window))
        }
    }
}

/// Dedup windows keyed `dedup.listeners.<name>` in Redis.
#[must_use]
pub fn redis_dedup_factory(client: redis::Client, window: usize) -> DeduplicatorFactory<RawEvent> {
    Arc::new(move |name: &str| {
        Arc::new(RedisDeduplicator::new(
            client.clone(),
            format!("dedup.listeners.{name}"),
            window,
        )) as Arc<dyn EventDeduplicator<RawEvent>>
    })
}

/// The projection: logs each event it receives.
///
/// # Errors
///
/// Never fails.
pub async fn log_events(events: Vec<RawEvent>) -> Result<(), BoxError> {
    for event in &events {
        info!(
            event_id = event.event_id(),
            event_type = event.event_type(),
            stream = %event.stream_key(),
            fields = event.data.len(),
            "event received"
        );
    }
    Ok(())
}

/// Creates the configured listener and feeds `handler` until `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Listener` if the listener fails to initialize or stops
/// with an error.
#[instrument(skip(factory, config, cancel, handler), fields(listener = %config.listener_name))]
pub async fn run_listener(
    factory: &CatchUpListenerFactory<RawEvent>,
    config: &Config,
    cancel: &CancellationToken,
    handler: &dyn BatchHandler<RawEvent>,
) -> Result<(), AppError> {
    let listener = factory
        .listener(&config.listener_name, &config.event_types, config.lock_ttl)
        .await?;
    info!(event_types = ?config.event_types, "listening");
    listener.listen(cancel, handler).await?;
    info!("listener stopped");
    Ok(())
}

/// Connects to every collaborator and runs the listener until `cancel` fires.
///
/// # Errors
///
/// Returns the first connection, migration or listener failure.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = PgEventStore::new(pool);
    store.migrate().await?;
    info!("event store ready");

    let broker = AmqpBroker::connect(&config.amqp_url).await?;
    info!("broker connected");

    let redis = redis::Client::open(config.redis_url.as_str())?;
    let locker = RedisLocker::connect(redis.clone()).await?;
    info!("redis connected");

    let deps = CatchUpDependencies {
        store: Arc::new(store) as Arc<dyn EventStore>,
        broker: Arc::new(broker),
        mapper: Arc::new(raw_event_mapper(&config.event_types)?),
        watermark: replay_watermark(config.replay_lookback_hours)?,
        locker: Arc::new(locker),
        lock_options: LockOptions::default()
            .with_retry_strategy(LinearBackoff(LOCK_RETRY_INTERVAL))
            .with_metadata(format!("pid:{}", std::process::id())),
    };
    let factory = CatchUpListenerFactory::new(deps, redis_dedup_factory(redis, config.dedup_window));

    run_listener(&factory, &config, &cancel, &log_events).await
}
