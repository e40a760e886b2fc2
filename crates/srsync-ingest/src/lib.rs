//! Streaming CSV ingestion of the two publisher datasets.

use srsync_core::PartitionError;
use thiserror::Error;

pub mod fields;
pub mod reader;
pub mod requests;

pub use csv::StringRecord;
pub use fields::{check_field_header, parse_field_row, FIELD_COLUMNS};
pub use reader::{is_malformed_row, CsvRecords};
pub use requests::{RequestColumns, REQUEST_HEADERS};

pub const CRATE_NAME: &str = "srsync-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("export is empty, expected a header row")]
    Empty,
    #[error("reading csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv reader stopped unexpectedly: {0}")]
    Reader(String),
    #[error("header is missing column {column}")]
    MissingColumn { column: &'static str },
    #[error("fields export has {found} columns, expected at least 4")]
    TooFewColumns { found: usize },
    #[error("row has no value for column {column}")]
    MissingValue { column: &'static str },
    #[error("invalid {column} value {value:?}: {reason}")]
    InvalidValue {
        column: &'static str,
        value: String,
        reason: String,
    },
    #[error("classifying request {id}: {source}")]
    Partition {
        id: i64,
        #[source]
        source: PartitionError,
    },
}

impl IngestError {
    /// True for rows the fields stream may skip.
    pub fn is_malformed_row(&self) -> bool {
        matches!(self, Self::Csv(err) if is_malformed_row(err))
    }
}

pub(crate) fn parse_id(column: &'static str, raw: &str) -> Result<i64, IngestError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|err| IngestError::InvalidValue {
            column,
            value: raw.to_string(),
            reason: err.to_string(),
        })
}
