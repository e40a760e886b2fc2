//! Sync watermark: the last applied upstream modification instant.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use srsync_core::format_instant_millis;

use crate::StoreError;

pub(crate) async fn bootstrap(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE TABLE IF NOT EXISTS sync_state (requests_modified TEXT)")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_watermark(
    conn: &mut SqliteConnection,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT requests_modified FROM sync_state LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;

    let Some((Some(value),)) = row else {
        return Ok(None);
    };
    let parsed = DateTime::parse_from_rfc3339(&value)
        .map_err(|source| StoreError::CorruptWatermark { value, source })?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

/// Overwrite the watermark row, creating it on the first successful sync.
pub async fn record_watermark(
    conn: &mut SqliteConnection,
    modified: DateTime<Utc>,
) -> Result<(), StoreError> {
    let value = format_instant_millis(modified);
    let updated = sqlx::query("UPDATE sync_state SET requests_modified = ?")
        .bind(&value)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if updated == 0 {
        sqlx::query("INSERT INTO sync_state (requests_modified) VALUES (?)")
            .bind(&value)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
