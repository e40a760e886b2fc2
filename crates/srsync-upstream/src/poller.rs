//! Export generation polling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use srsync_core::Cancelled;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{ByteSource, ExportStatus, Upstream, UpstreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between pending responses.
    pub interval: Duration,
    /// Total time allowed before giving up, measured from the first request.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            deadline: Duration::from_secs(10 * 60),
        }
    }
}

/// A ready-to-read export body.
pub struct Export {
    pub body: ByteSource,
    /// Modification instant established by the freshness check, if one ran.
    pub modified: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Export")
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// Request an export until the publisher reports a result location.
pub async fn poll_export(
    upstream: &dyn Upstream,
    item_id: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<String, UpstreamError> {
    let started = Instant::now();
    let deadline = started + policy.deadline;

    loop {
        if Instant::now() >= deadline {
            return Err(UpstreamError::DeadlineExceeded {
                item_id: item_id.to_string(),
                waited: started.elapsed(),
            });
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            status = upstream.request_export(item_id) => status?,
        };

        match status {
            ExportStatus::Ready { result_url } => return Ok(result_url),
            ExportStatus::Pending { body } => {
                info!(item_id, body = %body, "export pending, waiting");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled.into()),
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
        }
    }
}

/// Poll for an export of `item_id` and open its body.
pub async fn download(
    upstream: &dyn Upstream,
    item_id: &str,
    modified: Option<DateTime<Utc>>,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<Export, UpstreamError> {
    let result_url = poll_export(upstream, item_id, policy, cancel).await?;
    info!(item_id, result_url = %result_url, "downloading export");

    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Cancelled.into()),
        body = upstream.open_export(&result_url) => body?,
    };
    Ok(Export { body, modified })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    /// Reports pending `pending_for` times, then ready.
    struct ScriptedExport {
        pending_for: usize,
        attempts: AtomicUsize,
    }

    impl ScriptedExport {
        fn new(pending_for: usize) -> Self {
            Self {
                pending_for,
                attempts: AtomicUsize::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for ScriptedExport {
        async fn item_modified(&self, _item_id: &str) -> Result<DateTime<Utc>, UpstreamError> {
            Ok(Utc::now())
        }

        async fn request_export(&self, item_id: &str) -> Result<ExportStatus, UpstreamError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.pending_for {
                Ok(ExportStatus::Pending {
                    body: format!(r#"{{"status":"Pending","attempt":{attempt}}}"#),
                })
            } else {
                Ok(ExportStatus::Ready {
                    result_url: format!("https://files.example/{item_id}.csv"),
                })
            }
        }

        async fn open_export(&self, result_url: &str) -> Result<ByteSource, UpstreamError> {
            Ok(Box::new(std::io::Cursor::new(result_url.as_bytes().to_vec())))
        }
    }

    fn policy(interval_secs: u64, deadline_secs: u64) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(interval_secs),
            deadline: Duration::from_secs(deadline_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_through_pending_responses() {
        let upstream = ScriptedExport::new(2);
        let started = Instant::now();
        let url = poll_export(&upstream, "item", policy(10, 600), &CancellationToken::new())
            .await
            .expect("ready");

        assert_eq!(url, "https://files.example/item.csv");
        assert_eq!(upstream.attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_an_explicit_error() {
        let upstream = ScriptedExport::new(usize::MAX);
        let err = poll_export(&upstream, "item", policy(10, 30), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::DeadlineExceeded { .. }));
        assert_eq!(upstream.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff_wait() {
        let upstream = ScriptedExport::new(usize::MAX);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = poll_export(&upstream, "item", policy(10, 600), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::Cancelled(Cancelled)));
        assert_eq!(upstream.attempts(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn pre_cancelled_token_makes_no_requests() {
        let upstream = ScriptedExport::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = download(&upstream, "item", None, PollPolicy::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Cancelled(_)));
        assert_eq!(upstream.attempts(), 0);
    }

    #[tokio::test]
    async fn download_opens_the_result_location() {
        let upstream = ScriptedExport::new(0);
        let modified = Utc::now();
        let mut export = download(
            &upstream,
            "item",
            Some(modified),
            PollPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("download");

        let mut body = String::new();
        export.body.read_to_string(&mut body).await.expect("read");
        assert_eq!(body, "https://files.example/item.csv");
        assert_eq!(export.modified, Some(modified));
    }
}
