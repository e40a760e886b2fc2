use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use srsync_sync::{is_cancelled, DatasetSource, SyncConfig, SyncOutcome, SyncPipeline};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "srsync")]
#[command(about = "Sync the service-request datasets into a local SQLite database")]
struct Cli {
    /// Database file path
    #[arg(long)]
    db: Option<PathBuf>,
    /// Requests export on disk, otherwise download
    #[arg(long)]
    requests: Option<PathBuf>,
    /// Fields export on disk, otherwise download
    #[arg(long)]
    fields: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> SyncConfig {
        let mut config = SyncConfig::from_env();
        if let Some(db) = self.db {
            config.database_path = db;
        }
        if let Some(path) = self.requests {
            config.requests = DatasetSource::LocalFile(path);
        }
        if let Some(path) = self.fields {
            config.fields = DatasetSource::LocalFile(path);
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config();
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling sync");
            on_signal.cancel();
        }
    });

    match run(config, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_cancelled(&err) => {
            error!("sync cancelled, no changes were made");
            ExitCode::from(130)
        }
        Err(err) => {
            error!("sync failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SyncConfig, cancel: &CancellationToken) -> Result<()> {
    let pipeline = SyncPipeline::new(config).await?;
    let outcome = pipeline.run_once(cancel).await;
    pipeline.store().clone().close().await;

    match outcome? {
        SyncOutcome::UpToDate => info!("already up to date"),
        SyncOutcome::Applied(summary) => println!(
            "sync complete: run_id={} requests={} fields={} skipped_fields={} years={}",
            summary.run_id,
            summary.requests,
            summary.fields,
            summary.skipped_fields,
            summary
                .years
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
    Ok(())
}
