//! SQLite persistence: per-year partition schema, upsert statements and the
//! sync watermark.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use srsync_core::PartitionYear;
use thiserror::Error;
use tracing::debug;

pub mod schema;
pub mod state;

pub use schema::{ensure_partition, PartitionStatements};

pub const CRATE_NAME: &str = "srsync-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("stored watermark {value:?} is not an RFC 3339 instant: {source}")]
    CorruptWatermark {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Handle on the database file.
///
/// A single connection backs the pool; the synchronizer is the only writer.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        debug!(path = %path.display(), "opened store");

        state::bootstrap(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start the run transaction. Dropping it without commit rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn watermark(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        state::load_watermark(&mut conn).await
    }

    /// Years that currently have a requests table, ascending.
    pub async fn partition_years(&self) -> Result<Vec<PartitionYear>, StoreError> {
        let names: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'requests\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names
            .into_iter()
            .filter_map(|(name,)| name.strip_prefix("requests_")?.parse::<i32>().ok())
            .filter_map(|year| PartitionYear::new(year).ok())
            .collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
