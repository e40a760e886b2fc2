//! Per-year partition tables and the statements that write them.
//!
//! Every table name in the crate is built here, and only from a
//! [`PartitionYear`], so the sole variable part of the SQL text is a validated
//! four-digit integer.

use sqlx::sqlite::{SqliteConnection, SqliteStatement};
use sqlx::{Executor, Statement};
use srsync_core::{format_instant, PartitionYear, RequestField, ServiceRequest};
use tracing::debug;

/// Request columns written on insert and overwritten on conflict.
pub const REQUEST_COLUMNS: [&str; 17] = [
    "id",
    "initiated",
    "closed",
    "description",
    "initiator",
    "priority",
    "address",
    "community",
    "district",
    "category",
    "resolution",
    "latitude",
    "longitude",
    "status",
    "department",
    "work_order",
    "project_name",
];

/// Request columns written on insert only.
pub const INSERT_ONLY_COLUMNS: [&str; 1] = ["first_observed"];

pub fn requests_table(year: PartitionYear) -> String {
    format!("requests_{year}")
}

pub fn fields_table(year: PartitionYear) -> String {
    format!("request_fields_{year}")
}

pub fn create_requests_sql(year: PartitionYear) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         id INTEGER PRIMARY KEY, \
         initiated TEXT NOT NULL, \
         closed TEXT, \
         first_observed TEXT NOT NULL, \
         description TEXT, \
         initiator TEXT, \
         priority TEXT, \
         address TEXT, \
         community TEXT, \
         district TEXT, \
         category TEXT, \
         resolution TEXT, \
         latitude REAL, \
         longitude REAL, \
         status TEXT, \
         department TEXT, \
         work_order TEXT, \
         project_name TEXT)",
        requests_table(year)
    )
}

pub fn create_fields_sql(year: PartitionYear) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         id INTEGER NOT NULL REFERENCES {} (id), \
         category_id INTEGER NOT NULL, \
         category TEXT, \
         outcome TEXT, \
         PRIMARY KEY (id, category_id))",
        fields_table(year),
        requests_table(year)
    )
}

pub fn upsert_request_sql(year: PartitionYear) -> String {
    let columns: Vec<&str> = REQUEST_COLUMNS
        .iter()
        .chain(INSERT_ONLY_COLUMNS.iter())
        .copied()
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = REQUEST_COLUMNS
        .iter()
        .filter(|column| **column != "id")
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT (id) DO UPDATE SET {updates}",
        requests_table(year),
        columns.join(", "),
    )
}

pub fn upsert_field_sql(year: PartitionYear) -> String {
    format!(
        "INSERT INTO {} (id, category_id, category, outcome) VALUES (?, ?, ?, ?) \
         ON CONFLICT (id, category_id) DO UPDATE SET category = excluded.category, outcome = excluded.outcome",
        fields_table(year)
    )
}

/// Create the year's two tables if they are missing.
pub async fn ensure_partition(
    conn: &mut SqliteConnection,
    year: PartitionYear,
) -> Result<(), sqlx::Error> {
    sqlx::query(&create_requests_sql(year))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&create_fields_sql(year))
        .execute(&mut *conn)
        .await?;
    debug!(%year, "ensured partition tables");
    Ok(())
}

/// Upsert statements for one year, prepared on the run's connection.
#[derive(Debug)]
pub struct PartitionStatements {
    upsert_request: SqliteStatement<'static>,
    upsert_field: SqliteStatement<'static>,
}

impl PartitionStatements {
    /// The year's tables must already exist.
    pub async fn prepare(
        conn: &mut SqliteConnection,
        year: PartitionYear,
    ) -> Result<Self, sqlx::Error> {
        let request_sql = upsert_request_sql(year);
        let field_sql = upsert_field_sql(year);
        let upsert_request = Statement::to_owned(&(&mut *conn).prepare(&request_sql).await?);
        let upsert_field = Statement::to_owned(&(&mut *conn).prepare(&field_sql).await?);
        Ok(Self {
            upsert_request,
            upsert_field,
        })
    }

    /// `first_observed` only lands when the row is new.
    pub async fn upsert_request(
        &self,
        conn: &mut SqliteConnection,
        request: &ServiceRequest,
        first_observed: &str,
    ) -> Result<(), sqlx::Error> {
        self.upsert_request
            .query()
            .bind(request.id)
            .bind(format_instant(request.initiated))
            .bind(request.closed.map(format_instant))
            .bind(request.description.as_str())
            .bind(request.initiator.as_str())
            .bind(request.priority.as_str())
            .bind(request.address.as_str())
            .bind(request.community.as_str())
            .bind(request.district.as_str())
            .bind(request.category.as_str())
            .bind(request.resolution.as_str())
            .bind(request.latitude)
            .bind(request.longitude)
            .bind(request.status.as_str())
            .bind(request.department.as_str())
            .bind(request.work_order.as_str())
            .bind(request.project_name.as_str())
            .bind(first_observed)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn upsert_field(
        &self,
        conn: &mut SqliteConnection,
        field: &RequestField,
    ) -> Result<(), sqlx::Error> {
        self.upsert_field
            .query()
            .bind(field.id)
            .bind(field.category_id)
            .bind(field.category.as_str())
            .bind(field.outcome.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
