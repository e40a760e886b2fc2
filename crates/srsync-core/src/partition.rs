//! Year classification of primary records.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::time::{parse_local_timestamp, TimestampError};
use crate::{InvalidPartitionYear, PartitionYear};

/// Initiated values before this local year are treated as corrupt.
pub const EARLIEST_TRUSTED_YEAR: i32 = 2000;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("parsing initiated time: {0}")]
    Initiated(#[source] TimestampError),
    #[error("parsing closed time: {0}")]
    Closed(#[source] TimestampError),
    #[error("initiated time {initiated} predates 2000 and no closed time is available")]
    UntrustedInitiated { initiated: DateTime<Utc> },
    #[error(transparent)]
    Year(#[from] InvalidPartitionYear),
}

/// Where a primary record lands, plus its canonical instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub initiated: DateTime<Utc>,
    pub closed: Option<DateTime<Utc>>,
    pub year: PartitionYear,
    /// The year came from `closed` because `initiated` was untrusted.
    pub fell_back: bool,
}

/// Classify a record from its raw initiated and closed cells.
///
/// An empty closed cell means the request is still open.
pub fn classify(initiated_raw: &str, closed_raw: &str) -> Result<Placement, PartitionError> {
    let initiated = parse_local_timestamp(initiated_raw).map_err(PartitionError::Initiated)?;
    let closed = if closed_raw.trim().is_empty() {
        None
    } else {
        Some(parse_local_timestamp(closed_raw).map_err(PartitionError::Closed)?)
    };

    let (effective, fell_back): (DateTime<Tz>, bool) = if initiated.year() < EARLIEST_TRUSTED_YEAR {
        match closed {
            Some(closed) => (closed, true),
            None => {
                return Err(PartitionError::UntrustedInitiated {
                    initiated: initiated.with_timezone(&Utc),
                })
            }
        }
    } else {
        (initiated, false)
    };

    Ok(Placement {
        initiated: initiated.with_timezone(&Utc),
        closed: closed.map(|at| at.with_timezone(&Utc)),
        year: PartitionYear::new(effective.year())?,
        fell_back,
    })
}
