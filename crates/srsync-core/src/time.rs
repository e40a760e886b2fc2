//! Parsing of the publisher's local wall-clock timestamps.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use thiserror::Error;

/// Zone every source timestamp is written in.
pub const SOURCE_TZ: Tz = chrono_tz::America::Halifax;

/// `3/5/2019 1:02:03 PM`; chrono accepts the unpadded month, day and hour.
pub const SOURCE_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("timestamp {value:?} is not in M/D/YYYY h:mm:ss AM/PM form: {source}")]
    Format {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("timestamp {value:?} has no instant in America/Halifax")]
    Unresolvable { value: String },
}

/// Parse a source timestamp in [`SOURCE_TZ`].
///
/// Wall-clock times repeated by a fall-back transition resolve to the earlier
/// instant. Times skipped by a spring-forward transition are shifted one hour
/// later.
pub fn parse_local_timestamp(raw: &str) -> Result<DateTime<Tz>, TimestampError> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), SOURCE_TIMESTAMP_FORMAT).map_err(
        |source| TimestampError::Format {
            value: raw.to_string(),
            source,
        },
    )?;
    resolve_local(naive).ok_or_else(|| TimestampError::Unresolvable {
        value: raw.to_string(),
    })
}

fn resolve_local(naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match SOURCE_TZ.from_local_datetime(&naive) {
        LocalResult::Single(at) => Some(at),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => {
            let shifted = naive.checked_add_signed(TimeDelta::hours(1))?;
            SOURCE_TZ.from_local_datetime(&shifted).earliest()
        }
    }
}
