//! `PostgreSQL` implementation of the `EventStore` trait.
//!
//! Appends run in one `SERIALIZABLE` transaction. Database errors map to
//! `EventStoreError` as follows:
//!
//! | SQLSTATE | Constraint | `EventStoreError` |
//! |----------|------------|-------------------|
//! | `40001`, `40P01` | any | `WriteConflict` |
//! | `23505` | `streams_pkey`, `stream_events_pkey` | `WriteConflict` |
//! | `23505` | `stream_events_event_key` | `DuplicateEventId` |
//! | other | any | `Infrastructure` |

use async_trait::async_trait;
use catchup_core::error::EventStoreError;
use catchup_core::event::StreamKey;
use catchup_core::store::{EventStore, ReplayHandler, ReplayOptions};
use catchup_core::stream::{NewStreamEvent, Stream, StreamEvent, seal_batch};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgDatabaseError;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::schema::MIGRATOR;

const EVENT_COLUMNS: &str = "stream_id, stream_type, sequence_no, event_id, event_type, \
     event_version, event_time, correlation_id, payload";

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns the migrator's error if a migration fails.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

#[derive(Debug, FromRow)]
struct StreamEventRow {
    stream_id: String,
    stream_type: String,
    sequence_no: i64,
    event_id: String,
    event_type: String,
    event_version: i32,
    event_time: DateTime<Utc>,
    correlation_id: String,
    payload: serde_json::Value,
}

impl From<StreamEventRow> for StreamEvent {
    fn from(row: StreamEventRow) -> Self {
        Self {
            stream_type: row.stream_type,
            stream_id: row.stream_id,
            sequence_no: row.sequence_no,
            event_id: row.event_id,
            event_type: row.event_type,
            event_version: row.event_version,
            event_time: row.event_time,
            correlation_id: row.correlation_id,
            payload: row.payload,
        }
    }
}

fn map_sqlx_error(stream_key: Option<&StreamKey>, err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err.code();
        let conflict = match code.as_deref() {
            Some("40001" | "40P01") => true,
            Some("23505") => {
                if db_err.constraint() == Some("stream_events_event_key") {
                    let detail = db_err
                        .try_downcast_ref::<PgDatabaseError>()
                        .and_then(PgDatabaseError::detail)
                        .unwrap_or_else(|| db_err.message());
                    return EventStoreError::DuplicateEventId(detail.to_owned());
                }
                true
            }
            _ => false,
        };
        if let (true, Some(stream_key)) = (conflict, stream_key) {
            return EventStoreError::WriteConflict {
                stream_key: stream_key.clone(),
                reason: db_err.message().to_owned(),
            };
        }
    }
    EventStoreError::Infrastructure(err.to_string())
}

/// Picks the event of `sealed` named by a unique-violation detail such as
/// `Key (event_id, event_type)=(a, user-created) already exists.`
fn duplicate_id(sealed: &[StreamEvent], detail: &str) -> String {
    sealed
        .iter()
        .find(|e| detail.contains(&format!("=({}, {})", e.event_id, e.event_type)))
        .map_or_else(|| detail.to_owned(), |e| e.event_id.clone())
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, stream_key), fields(stream = %stream_key))]
    async fn load(&self, stream_key: &StreamKey) -> Result<Vec<StreamEvent>, EventStoreError> {
        let rows: Vec<StreamEventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM stream_events \
             WHERE stream_id = $1 AND stream_type = $2 \
             ORDER BY sequence_no ASC"
        ))
        .bind(&stream_key.stream_id)
        .bind(&stream_key.stream_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(Some(stream_key), e))?;

        debug!(event_count = rows.len(), "stream loaded");
        Ok(rows.into_iter().map(StreamEvent::from).collect())
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
        let map_err = |e: sqlx::Error| map_sqlx_error(Some(stream_key), e);

        let mut tx = self.pool.begin().await.map_err(map_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?;

        let latest_version: Option<i64> = sqlx::query_scalar(
            "SELECT latest_version FROM streams WHERE stream_id = $1 AND stream_type = $2",
        )
        .bind(&stream_key.stream_id)
        .bind(&stream_key.stream_type)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_err)?;

        let mut stream = Stream::new(stream_key.clone());
        match latest_version {
            Some(version) => stream.latest_version = version,
            None => {
                sqlx::query(
                    "INSERT INTO streams (stream_id, stream_type, latest_version) VALUES ($1, $2, 0)",
                )
                .bind(&stream_key.stream_id)
                .bind(&stream_key.stream_type)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            }
        }
        stream.check_revision(expected_revision)?;
        if events.is_empty() {
            tx.commit().await.map_err(map_err)?;
            return Ok(Vec::new());
        }

        let correlation_id = Uuid::new_v4().to_string();
        let sealed = seal_batch(stream_key, expected_revision, now, &correlation_id, events)?;

        {
            let mut insert = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO stream_events ({EVENT_COLUMNS}) "
            ));
            insert.push_values(&sealed, |mut row, event| {
                row.push_bind(&event.stream_id)
                    .push_bind(&event.stream_type)
                    .push_bind(event.sequence_no)
                    .push_bind(&event.event_id)
                    .push_bind(&event.event_type)
                    .push_bind(event.event_version)
                    .push_bind(event.event_time)
                    .push_bind(&event.correlation_id)
                    .push_bind(&event.payload);
            });
            insert
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| match map_err(e) {
                    EventStoreError::DuplicateEventId(reason) => {
                        EventStoreError::DuplicateEventId(duplicate_id(&sealed, &reason))
                    }
                    other => other,
                })?;
        }

        stream.advance(&sealed);
        sqlx::query(
            "UPDATE streams SET latest_version = $3 WHERE stream_id = $1 AND stream_type = $2",
        )
        .bind(&stream_key.stream_id)
        .bind(&stream_key.stream_type)
        .bind(stream.latest_version)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;

        debug!(latest_version = stream.latest_version, %correlation_id, "events appended");
        Ok(sealed)
    }

    #[instrument(
        skip(self, handler, options),
        fields(batch_size = options.effective_batch_size())
    )]
    async fn replay_events_by_type(
        &self,
        event_types: &[String],
        since: DateTime<Utc>,
        handler: &dyn ReplayHandler,
        options: ReplayOptions,
    ) -> Result<(), EventStoreError> {
        if event_types.is_empty() {
            return Ok(());
        }
        let batch_size = options.effective_batch_size();
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM stream_events \
             WHERE event_type = ANY($1) AND event_time > $2 \
             ORDER BY event_time ASC, sequence_no ASC, stream_type ASC, stream_id ASC \
             LIMIT $3 OFFSET $4"
        );

        let mut offset: i64 = 0;
        let mut pages = 0_usize;
        loop {
            let rows: Vec<StreamEventRow> = sqlx::query_as(&query)
                .bind(event_types)
                .bind(since)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(None, e))?;

            let page_len = rows.len();
            if page_len > 0 {
                pages += 1;
                let events = rows.into_iter().map(StreamEvent::from).collect();
                handler.handle(events).await.map_err(EventStoreError::Replay)?;
            }
            if page_len < batch_size {
                break;
            }
            offset += limit;
        }

        debug!(pages, "replay finished");
        Ok(())
    }
}
