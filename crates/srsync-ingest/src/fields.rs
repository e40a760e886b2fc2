//! Secondary dataset rows. Columns are positional.

use csv::StringRecord;
use srsync_core::RequestField;

use crate::{parse_id, IngestError};

/// Request id, category id, category label, outcome label.
pub const FIELD_COLUMNS: usize = 4;

pub fn check_field_header(headers: &StringRecord) -> Result<(), IngestError> {
    if headers.len() < FIELD_COLUMNS {
        return Err(IngestError::TooFewColumns {
            found: headers.len(),
        });
    }
    Ok(())
}

pub fn parse_field_row(record: &StringRecord) -> Result<RequestField, IngestError> {
    let cell = |idx: usize, column: &'static str| {
        record.get(idx).ok_or(IngestError::MissingValue { column })
    };

    Ok(RequestField {
        id: parse_id("request id", cell(0, "request id")?)?,
        category_id: parse_id("category id", cell(1, "category id")?)?,
        category: cell(2, "category")?.to_string(),
        outcome: cell(3, "outcome")?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_columns() {
        let field = parse_field_row(&StringRecord::from(vec!["42", "3", "Surface", "Asphalt"])).unwrap();
        assert_eq!(
            field,
            RequestField {
                id: 42,
                category_id: 3,
                category: "Surface".into(),
                outcome: "Asphalt".into(),
            }
        );
    }

    #[test]
    fn narrow_headers_are_rejected() {
        let err = check_field_header(&StringRecord::from(vec!["a", "b", "c"])).unwrap_err();
        assert!(matches!(err, IngestError::TooFewColumns { found: 3 }));
        assert!(check_field_header(&StringRecord::from(vec!["a", "b", "c", "d", "e"])).is_ok());
    }

    #[test]
    fn non_numeric_ids_are_errors() {
        let err = parse_field_row(&StringRecord::from(vec!["abc", "3", "x", "y"])).unwrap_err();
        assert!(matches!(err, IngestError::InvalidValue { column: "request id", .. }));
        assert!(!err.is_malformed_row());
    }
}
