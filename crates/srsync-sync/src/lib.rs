//! Sync pipeline orchestration: freshness check, export download, streaming
//! ingestion of both datasets and a single commit per run.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use srsync_core::{Cancelled, PartitionYear};
use srsync_ingest::{
    check_field_header, parse_field_row, CsvRecords, IngestError, RequestColumns, StringRecord,
};
use srsync_store::Store;
use srsync_upstream::{
    download, open_local, resolve_freshness, ArcGisClient, ByteSource, Endpoints, Export,
    Freshness, HttpClientConfig, HttpFetcher, PollPolicy, Upstream,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod run;

pub use run::{JoinError, RequestYears, RunError, SyncRun};

pub const CRATE_NAME: &str = "srsync-sync";

pub const DEFAULT_REQUESTS_ITEM: &str = "d2b7dd138adb468293183926a1a7a81c";
pub const DEFAULT_FIELDS_ITEM: &str = "81703e2cda974ffb8d4ba1f313d18429";

/// Where a dataset export comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    Remote { item_id: String },
    /// Pre-fetched export; skips the network entirely.
    LocalFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub requests: DatasetSource,
    pub fields: DatasetSource,
    pub endpoints: Endpoints,
    pub poll: PollPolicy,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub progress_every: usize,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let source = |file_var: &str, item_var: &str, default_item: &str| {
            match std::env::var(file_var) {
                Ok(path) if !path.is_empty() => DatasetSource::LocalFile(PathBuf::from(path)),
                _ => DatasetSource::Remote {
                    item_id: std::env::var(item_var).unwrap_or_else(|_| default_item.to_string()),
                },
            }
        };
        let secs = |var: &str, default: u64| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let defaults = Endpoints::default();

        Self {
            database_path: std::env::var("SRSYNC_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data.db")),
            requests: source("SRSYNC_REQUESTS_FILE", "SRSYNC_REQUESTS_ITEM", DEFAULT_REQUESTS_ITEM),
            fields: source("SRSYNC_FIELDS_FILE", "SRSYNC_FIELDS_ITEM", DEFAULT_FIELDS_ITEM),
            endpoints: Endpoints {
                metadata_base: std::env::var("SRSYNC_METADATA_BASE")
                    .unwrap_or(defaults.metadata_base),
                download_base: std::env::var("SRSYNC_DOWNLOAD_BASE")
                    .unwrap_or(defaults.download_base),
            },
            poll: PollPolicy {
                interval: Duration::from_secs(secs("SRSYNC_POLL_INTERVAL_SECS", 10)),
                deadline: Duration::from_secs(secs("SRSYNC_POLL_DEADLINE_SECS", 600)),
            },
            http_timeout_secs: secs("SRSYNC_HTTP_TIMEOUT_SECS", 60),
            user_agent: std::env::var("SRSYNC_USER_AGENT")
                .unwrap_or_else(|_| format!("srsync/{}", env!("CARGO_PKG_VERSION"))),
            progress_every: secs("SRSYNC_PROGRESS_EVERY", 10_000).max(1) as usize,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requests: usize,
    pub fields: usize,
    pub skipped_fields: usize,
    pub years: Vec<PartitionYear>,
    /// Watermark written by this run; `None` when requests came from a file.
    pub watermark: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub enum SyncOutcome {
    /// Upstream has nothing newer than the stored watermark.
    UpToDate,
    Applied(SyncSummary),
}

/// True when `err` was caused by the run's cancellation signal.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Store,
    upstream: Box<dyn Upstream>,
}

impl SyncPipeline {
    pub async fn new(config: SyncConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)
            .await
            .with_context(|| format!("opening database {}", config.database_path.display()))?;
        let http = HttpFetcher::new(HttpClientConfig {
            read_timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let upstream = Box::new(ArcGisClient::new(http, config.endpoints.clone()));
        Ok(Self {
            config,
            store,
            upstream,
        })
    }

    pub fn with_upstream(mut self, upstream: Box<dyn Upstream>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id, cancel)
            .instrument(info_span!("sync_run", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let started_at = Utc::now();

        let Some(requests) = self.open_requests(cancel).await? else {
            info!("requests dataset unchanged since last sync, nothing to do");
            return Ok(SyncOutcome::UpToDate);
        };
        let watermark = requests.modified;

        let mut records = open_records(requests.body, cancel)
            .await?
            .context("reading requests header")?;
        let columns =
            RequestColumns::resolve(records.headers()).context("resolving requests header")?;

        let mut run = SyncRun::begin(&self.store, started_at)
            .await
            .context("beginning transaction")?;

        let requests_written = self
            .ingest_requests(&mut run, &mut records, &columns, cancel)
            .await?;
        drop(records);

        let fields = self.open_fields(cancel).await?;
        let mut records = open_records(fields, cancel)
            .await?
            .context("reading fields header")?;
        check_field_header(records.headers()).context("checking fields header")?;
        let (fields_written, skipped_fields) =
            self.ingest_fields(&mut run, &mut records, cancel).await?;
        drop(records);

        if let Some(modified) = watermark {
            run.record_watermark(modified)
                .await
                .context("updating sync state")?;
        }
        let years = run.years();
        run.commit().await.context("committing transaction")?;

        let summary = SyncSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            requests: requests_written,
            fields: fields_written,
            skipped_fields,
            years,
            watermark,
        };
        info!(
            requests = summary.requests,
            fields = summary.fields,
            skipped_fields = summary.skipped_fields,
            years = summary.years.len(),
            "sync committed"
        );
        Ok(SyncOutcome::Applied(summary))
    }

    /// `None` when the remote dataset has not changed since the watermark.
    async fn open_requests(&self, cancel: &CancellationToken) -> Result<Option<Export>> {
        let item_id = match &self.config.requests {
            DatasetSource::LocalFile(path) => {
                info!(path = %path.display(), "reading requests from local file");
                let body = open_local(path).await.context("opening requests file")?;
                return Ok(Some(Export {
                    body,
                    modified: None,
                }));
            }
            DatasetSource::Remote { item_id } => item_id,
        };

        let watermark = self
            .store
            .watermark()
            .await
            .context("selecting modified time")?;
        let freshness = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            freshness = resolve_freshness(self.upstream.as_ref(), item_id, watermark) => {
                freshness.context("getting modified time")?
            }
        };

        match freshness {
            Freshness::UpToDate { .. } => Ok(None),
            Freshness::Stale { modified } => {
                info!(
                    item_id = item_id.as_str(),
                    last_modified = ?watermark,
                    current_modified = %modified,
                    "downloading requests"
                );
                let export = download(
                    self.upstream.as_ref(),
                    item_id,
                    Some(modified),
                    self.config.poll,
                    cancel,
                )
                .await
                .context("downloading requests")?;
                Ok(Some(export))
            }
        }
    }

    async fn open_fields(&self, cancel: &CancellationToken) -> Result<ByteSource> {
        match &self.config.fields {
            DatasetSource::LocalFile(path) => {
                info!(path = %path.display(), "reading fields from local file");
                Ok(open_local(path).await.context("opening fields file")?)
            }
            DatasetSource::Remote { item_id } => {
                info!(item_id = item_id.as_str(), "downloading fields");
                let export = download(self.upstream.as_ref(), item_id, None, self.config.poll, cancel)
                    .await
                    .context("downloading fields")?;
                Ok(export.body)
            }
        }
    }

    async fn ingest_requests(
        &self,
        run: &mut SyncRun,
        records: &mut CsvRecords,
        columns: &RequestColumns,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut written = 0usize;
        while let Some(record) = next_record(records, cancel).await? {
            let record = record.context("reading requests row")?;
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            let request = columns
                .parse(&record)
                .with_context(|| format!("parsing requests row at line {line}"))?;
            run.upsert_request(&request)
                .await
                .with_context(|| format!("inserting request {}", request.id))?;

            written += 1;
            if written % self.config.progress_every == 0 {
                info!(processed = written, "processed requests");
            }
        }
        info!(processed = written, "finished requests");
        Ok(written)
    }

    /// Returns rows written and malformed rows skipped.
    async fn ingest_fields(
        &self,
        run: &mut SyncRun,
        records: &mut CsvRecords,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize)> {
        let mut written = 0usize;
        let mut skipped = 0usize;
        while let Some(record) = next_record(records, cancel).await? {
            let record = match record {
                Ok(record) => record,
                Err(err) if err.is_malformed_row() => {
                    warn!(error = %err, "skipping malformed fields row");
                    skipped += 1;
                    continue;
                }
                Err(err) => return Err(err).context("reading fields row"),
            };
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            let field = parse_field_row(&record)
                .with_context(|| format!("parsing fields row at line {line}"))?;
            run.upsert_field(&field).await.with_context(|| {
                format!(
                    "inserting fields row for request {} category {}",
                    field.id, field.category_id
                )
            })?;

            written += 1;
            if written % self.config.progress_every == 0 {
                info!(processed = written, "processed fields");
            }
        }
        info!(processed = written, skipped, "finished fields");
        Ok((written, skipped))
    }
}

/// Start reading an export; the header row is the first read of the stream.
async fn open_records(
    source: ByteSource,
    cancel: &CancellationToken,
) -> Result<Result<CsvRecords, IngestError>, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        records = CsvRecords::open(source) => Ok(records),
    }
}

async fn next_record(
    records: &mut CsvRecords,
    cancel: &CancellationToken,
) -> Result<Option<Result<StringRecord, IngestError>>, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        next = records.next_record() => Ok(next),
    }
}
