//! ArcGIS Hub implementation of [`Upstream`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{ByteSource, ExportStatus, HttpFetcher, Upstream, UpstreamError};

pub const DEFAULT_METADATA_BASE: &str = "https://www.arcgis.com/sharing/rest/content/items";
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://hub.arcgis.com/api/download/v1/items";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub metadata_base: String,
    pub download_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            metadata_base: DEFAULT_METADATA_BASE.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
        }
    }
}

impl Endpoints {
    pub fn metadata_url(&self, item_id: &str) -> String {
        format!("{}/{item_id}?f=json", self.metadata_base.trim_end_matches('/'))
    }

    pub fn export_url(&self, item_id: &str) -> String {
        format!(
            "{}/{item_id}/csv?redirect=false&layers=0",
            self.download_base.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct ItemMetadata {
    /// Milliseconds since the Unix epoch.
    modified: i64,
}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    #[serde(default, rename = "resultUrl")]
    result_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArcGisClient {
    http: HttpFetcher,
    endpoints: Endpoints,
}

impl ArcGisClient {
    pub fn new(http: HttpFetcher, endpoints: Endpoints) -> Self {
        Self { http, endpoints }
    }
}

#[async_trait]
impl Upstream for ArcGisClient {
    async fn item_modified(&self, item_id: &str) -> Result<DateTime<Utc>, UpstreamError> {
        let url = self.endpoints.metadata_url(item_id);
        let resp = self.http.get_json::<ItemMetadata>(&url).await?;
        modified_instant(item_id, resp.value.modified)
    }

    async fn request_export(&self, item_id: &str) -> Result<ExportStatus, UpstreamError> {
        let url = self.endpoints.export_url(item_id);
        let resp = self.http.get_json::<ExportResponse>(&url).await?;
        Ok(export_status(resp.value, resp.raw))
    }

    async fn open_export(&self, result_url: &str) -> Result<ByteSource, UpstreamError> {
        self.http.get_stream(result_url).await
    }
}

fn modified_instant(item_id: &str, millis: i64) -> Result<DateTime<Utc>, UpstreamError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| UpstreamError::InvalidMetadata {
        item_id: item_id.to_string(),
        reason: format!("modified value {millis} is out of range"),
    })
}

fn export_status(resp: ExportResponse, raw: String) -> ExportStatus {
    match resp.result_url {
        Some(result_url) if !result_url.trim().is_empty() => ExportStatus::Ready { result_url },
        _ => ExportStatus::Pending { body: raw },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_the_hub_layout() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoints.metadata_url("d2b7dd138adb468293183926a1a7a81c"),
            "https://www.arcgis.com/sharing/rest/content/items/d2b7dd138adb468293183926a1a7a81c?f=json"
        );
        assert_eq!(
            endpoints.export_url("81703e2cda974ffb8d4ba1f313d18429"),
            "https://hub.arcgis.com/api/download/v1/items/81703e2cda974ffb8d4ba1f313d18429/csv?redirect=false&layers=0"
        );

        let custom = Endpoints {
            metadata_base: "http://localhost:9000/items/".into(),
            download_base: "http://localhost:9000/download/".into(),
        };
        assert_eq!(custom.metadata_url("abc"), "http://localhost:9000/items/abc?f=json");
    }

    #[test]
    fn empty_or_missing_result_url_is_pending() {
        let raw = r#"{"status":"Pending"}"#;
        let resp: ExportResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            export_status(resp, raw.to_string()),
            ExportStatus::Pending { body: raw.to_string() }
        );

        let raw = r#"{"resultUrl":""}"#;
        let resp: ExportResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(export_status(resp, raw.to_string()), ExportStatus::Pending { .. }));

        let raw = r#"{"resultUrl":"https://files.example/export.csv","status":"Completed"}"#;
        let resp: ExportResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            export_status(resp, raw.to_string()),
            ExportStatus::Ready {
                result_url: "https://files.example/export.csv".into()
            }
        );
    }

    #[test]
    fn metadata_requires_a_modified_field() {
        assert!(serde_json::from_str::<ItemMetadata>(r#"{"id":"x"}"#).is_err());
        let meta: ItemMetadata = serde_json::from_str(r#"{"modified":1700000000123}"#).unwrap();
        let at = modified_instant("x", meta.modified).unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_123);
        assert!(matches!(
            modified_instant("x", i64::MAX),
            Err(UpstreamError::InvalidMetadata { .. })
        ));
    }
}
