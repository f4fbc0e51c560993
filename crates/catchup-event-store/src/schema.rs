//! Event store database schema.

use sqlx::migrate::Migrator;

/// Migrations creating the `streams` and `stream_events` tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
