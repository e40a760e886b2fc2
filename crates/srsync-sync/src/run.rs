//! Run-scoped write state: the transaction, per-year statements and the
//! request-id to year map used to place fields rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use srsync_core::{format_instant_millis, PartitionYear, RequestField, ServiceRequest};
use srsync_store::{ensure_partition, state, PartitionStatements, Store, StoreError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("fields row references request {id}, which this run did not ingest")]
    UnknownRequest { id: i64 },
}

/// Year partition of every request ingested in the current run.
#[derive(Debug, Default)]
pub struct RequestYears {
    years: HashMap<i64, PartitionYear>,
}

impl RequestYears {
    pub fn record(&mut self, id: i64, year: PartitionYear) {
        self.years.insert(id, year);
    }

    pub fn resolve(&self, id: i64) -> Result<PartitionYear, JoinError> {
        self.years
            .get(&id)
            .copied()
            .ok_or(JoinError::UnknownRequest { id })
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// All writes of one sync run, staged in a single transaction.
///
/// Dropping a run without [`SyncRun::commit`] rolls everything back.
pub struct SyncRun {
    tx: Transaction<'static, Sqlite>,
    first_observed: String,
    partitions: HashMap<PartitionYear, PartitionStatements>,
    request_years: RequestYears,
}

impl SyncRun {
    pub async fn begin(store: &Store, observed_at: DateTime<Utc>) -> Result<Self, RunError> {
        Ok(Self {
            tx: store.begin().await?,
            first_observed: format_instant_millis(observed_at),
            partitions: HashMap::new(),
            request_years: RequestYears::default(),
        })
    }

    pub async fn upsert_request(&mut self, request: &ServiceRequest) -> Result<(), RunError> {
        self.ensure_partition(request.year).await?;
        let statements = &self.partitions[&request.year];
        statements
            .upsert_request(&mut self.tx, request, &self.first_observed)
            .await?;
        self.request_years.record(request.id, request.year);
        Ok(())
    }

    /// Write a fields row into its parent request's partition.
    pub async fn upsert_field(&mut self, field: &RequestField) -> Result<PartitionYear, RunError> {
        let year = self.request_years.resolve(field.id)?;
        self.ensure_partition(year).await?;
        let statements = &self.partitions[&year];
        statements.upsert_field(&mut self.tx, field).await?;
        Ok(year)
    }

    pub async fn record_watermark(&mut self, modified: DateTime<Utc>) -> Result<(), RunError> {
        state::record_watermark(&mut self.tx, modified).await?;
        Ok(())
    }

    /// Years touched so far, ascending.
    pub fn years(&self) -> Vec<PartitionYear> {
        let mut years: Vec<_> = self.partitions.keys().copied().collect();
        years.sort();
        years
    }

    pub async fn commit(self) -> Result<(), RunError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn ensure_partition(&mut self, year: PartitionYear) -> Result<(), sqlx::Error> {
        if self.partitions.contains_key(&year) {
            return Ok(());
        }
        ensure_partition(&mut self.tx, year).await?;
        let statements = PartitionStatements::prepare(&mut self.tx, year).await?;
        debug!(%year, "prepared partition statements");
        self.partitions.insert(year, statements);
        Ok(())
    }
}
