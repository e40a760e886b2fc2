//! Upstream access: HTTP fetch utilities, the publisher client, freshness
//! checks and export polling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use srsync_core::Cancelled;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info_span, Instrument};

pub mod arcgis;
pub mod freshness;
pub mod poller;

pub use arcgis::{ArcGisClient, Endpoints};
pub use freshness::{resolve_freshness, Freshness};
pub use poller::{download, poll_export, Export, PollPolicy};

pub const CRATE_NAME: &str = "srsync-upstream";

/// Forward-only byte stream of a dataset export.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("item {item_id} metadata is unusable: {reason}")]
    InvalidMetadata { item_id: String, reason: String },
    #[error("export of {item_id} not ready after {waited:?}")]
    DeadlineExceeded { item_id: String, waited: Duration },
    #[error("opening {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upstream call interrupted")]
    Cancelled(#[from] Cancelled),
}

/// State of an export-generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Ready { result_url: String },
    /// Not generated yet; `body` is the raw response for diagnostics.
    Pending { body: String },
}

/// Publisher operations the synchronizer depends on.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Last modification instant of a dataset item.
    async fn item_modified(&self, item_id: &str) -> Result<DateTime<Utc>, UpstreamError>;

    /// Ask for (or check on) a CSV export of a dataset item.
    async fn request_export(&self, item_id: &str) -> Result<ExportStatus, UpstreamError>;

    /// Open the body of a generated export.
    async fn open_export(&self, result_url: &str) -> Result<ByteSource, UpstreamError>;
}

/// Open a pre-fetched export on disk.
pub async fn open_local(path: &Path) -> Result<ByteSource, UpstreamError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| UpstreamError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Box::new(file))
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    /// Per-read idle timeout; exports stream for much longer than this.
    pub read_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            read_timeout: Duration::from_secs(60),
            user_agent: None,
        }
    }
}

/// Decoded JSON body together with its raw text.
#[derive(Debug, Clone)]
pub struct JsonResponse<T> {
    pub value: T,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET `url`, require a 2xx status and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<JsonResponse<T>, UpstreamError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self.send(url).await?;
            let status = resp.status();
            let raw = resp.text().await.map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;
            check_status(status, url, &raw)?;
            debug!(bytes = raw.len(), "fetched json body");

            let value = serde_json::from_str(&raw).map_err(|source| UpstreamError::Decode {
                url: url.to_string(),
                source,
            })?;
            Ok::<_, UpstreamError>(JsonResponse { value, raw })
        }
        .instrument(span)
        .await
    }

    /// GET `url` and hand back the body as a stream once the status is 2xx.
    pub async fn get_stream(&self, url: &str) -> Result<ByteSource, UpstreamError> {
        let span = info_span!("http_stream", url);
        async {
            let resp = self.send(url).await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(status_error(status, url, &body));
            }

            let stream = Box::pin(resp.bytes_stream().map_err(std::io::Error::other));
            let reader: ByteSource = Box::new(StreamReader::new(stream));
            Ok::<_, UpstreamError>(reader)
        }
        .instrument(span)
        .await
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, UpstreamError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })
    }
}

fn check_status(status: StatusCode, url: &str, body: &str) -> Result<(), UpstreamError> {
    if status.is_success() {
        return Ok(());
    }
    Err(status_error(status, url, body))
}

fn status_error(status: StatusCode, url: &str, body: &str) -> UpstreamError {
    UpstreamError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
        body: body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP/1.1 response on a loopback port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/export.csv")
    }

    #[test]
    fn non_success_status_carries_body() {
        let err = check_status(StatusCode::BAD_GATEWAY, "https://example.test/x", "upstream down")
            .unwrap_err();
        match err {
            UpstreamError::HttpStatus { status, url, body } => {
                assert_eq!(status, 502);
                assert_eq!(url, "https://example.test/x");
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(check_status(StatusCode::OK, "u", "").is_ok());
    }

    #[tokio::test]
    async fn export_stream_rejects_non_success_status() {
        let url = serve_once("503 Service Unavailable", "export unavailable").await;
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");

        let err = match http.get_stream(&url).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        match err {
            UpstreamError::HttpStatus { status, url: failed, body } => {
                assert_eq!(status, 503);
                assert_eq!(failed, url);
                assert_eq!(body, "export unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn export_stream_yields_the_body() {
        let url = serve_once("200 OK", "REQUEST_ID\n7\n").await;
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");

        let mut source = http.get_stream(&url).await.expect("stream");
        let mut text = String::new();
        source.read_to_string(&mut text).await.expect("read");
        assert_eq!(text, "REQUEST_ID\n7\n");
    }

    #[tokio::test]
    async fn local_files_stream_their_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("requests.csv");
        std::fs::write(&path, "REQUEST_ID\n1\n").expect("write");

        let mut source = open_local(&path).await.expect("open");
        let mut text = String::new();
        source.read_to_string(&mut text).await.expect("read");
        assert_eq!(text, "REQUEST_ID\n1\n");
    }

    #[tokio::test]
    async fn missing_local_file_names_the_path() {
        let err = match open_local(Path::new("/nonexistent/fields.csv")).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("/nonexistent/fields.csv"));
    }
}
