//! Staleness check of a dataset item against the stored watermark.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{Upstream, UpstreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing newer than the watermark; the run is a successful no-op.
    UpToDate { modified: DateTime<Utc> },
    Stale { modified: DateTime<Utc> },
}

impl Freshness {
    /// Decide from the upstream modification instant and the stored watermark.
    pub fn compare(modified: DateTime<Utc>, watermark: Option<DateTime<Utc>>) -> Self {
        match watermark {
            Some(watermark) if modified <= watermark => Self::UpToDate { modified },
            _ => Self::Stale { modified },
        }
    }
}

/// Fetch an item's modification instant and compare it to `watermark`.
pub async fn resolve_freshness(
    upstream: &dyn Upstream,
    item_id: &str,
    watermark: Option<DateTime<Utc>>,
) -> Result<Freshness, UpstreamError> {
    let modified = upstream.item_modified(item_id).await?;
    let freshness = Freshness::compare(modified, watermark);
    info!(
        item_id,
        last_modified = ?watermark,
        current_modified = %modified,
        stale = matches!(freshness, Freshness::Stale { .. }),
        "resolved dataset freshness"
    );
    Ok(freshness)
}
