//! Core domain model for the service-request synchronizer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod partition;
pub mod time;

pub use partition::{classify, PartitionError, Placement};
pub use time::{parse_local_timestamp, TimestampError, SOURCE_TIMESTAMP_FORMAT, SOURCE_TZ};

pub const CRATE_NAME: &str = "srsync-core";

/// Raised when an external cancellation signal aborts a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sync run cancelled")]
pub struct Cancelled;

/// Calendar year that names a pair of partition tables.
///
/// Only four-digit years are accepted so the value can be spliced into a table
/// name without quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionYear(i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("year {0} is outside the partitionable range 1000..=9999")]
pub struct InvalidPartitionYear(pub i32);

impl PartitionYear {
    pub fn new(year: i32) -> Result<Self, InvalidPartitionYear> {
        if (1000..=9999).contains(&year) {
            Ok(Self(year))
        } else {
            Err(InvalidPartitionYear(year))
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PartitionYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the primary dataset after parsing and partition classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: i64,
    /// Source value, even when the partition fell back to `closed`.
    pub initiated: DateTime<Utc>,
    pub closed: Option<DateTime<Utc>>,
    pub year: PartitionYear,
    pub description: String,
    pub initiator: String,
    pub priority: String,
    pub address: String,
    pub community: String,
    pub district: String,
    pub category: String,
    pub resolution: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
    pub department: String,
    pub work_order: String,
    pub project_name: String,
}

/// One categorical outcome row of the secondary dataset.
///
/// Carries no year of its own; the partition comes from the parent request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestField {
    pub id: i64,
    pub category_id: i64,
    pub category: String,
    pub outcome: String,
}

/// Canonical text form used for every stored instant.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Like [`format_instant`] but keeps millisecond precision.
pub fn format_instant_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
