//! Primary dataset rows: header resolution and typed parsing.

use std::collections::HashMap;

use csv::StringRecord;
use srsync_core::{classify, ServiceRequest};
use tracing::debug;

use crate::{parse_id, IngestError};

/// Columns the primary export must carry, in any order.
pub const REQUEST_HEADERS: [&str; 17] = [
    "REQUEST_ID",
    "DATE_INITIATED",
    "DATE_CLOSED",
    "DESCRIPTION",
    "INITIATED_BY",
    "PRIORITY",
    "ADDRESS",
    "COMMUNITY",
    "DISTRICT",
    "REQUEST_CATEGORY",
    "RESOLUTION",
    "LATITUDE",
    "LONGITUDE",
    "STATUS",
    "DEPT_RESPONSIBILITY",
    "WORK_ORDER",
    "PROJECT_NAME",
];

/// Column positions resolved once from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestColumns {
    id: usize,
    initiated: usize,
    closed: usize,
    description: usize,
    initiator: usize,
    priority: usize,
    address: usize,
    community: usize,
    district: usize,
    category: usize,
    resolution: usize,
    latitude: usize,
    longitude: usize,
    status: usize,
    department: usize,
    work_order: usize,
    project_name: usize,
}

impl RequestColumns {
    pub fn resolve(headers: &StringRecord) -> Result<Self, IngestError> {
        let positions: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim(), idx))
            .collect();
        let find = |column: &'static str| {
            positions
                .get(column)
                .copied()
                .ok_or(IngestError::MissingColumn { column })
        };

        Ok(Self {
            id: find("REQUEST_ID")?,
            initiated: find("DATE_INITIATED")?,
            closed: find("DATE_CLOSED")?,
            description: find("DESCRIPTION")?,
            initiator: find("INITIATED_BY")?,
            priority: find("PRIORITY")?,
            address: find("ADDRESS")?,
            community: find("COMMUNITY")?,
            district: find("DISTRICT")?,
            category: find("REQUEST_CATEGORY")?,
            resolution: find("RESOLUTION")?,
            latitude: find("LATITUDE")?,
            longitude: find("LONGITUDE")?,
            status: find("STATUS")?,
            department: find("DEPT_RESPONSIBILITY")?,
            work_order: find("WORK_ORDER")?,
            project_name: find("PROJECT_NAME")?,
        })
    }

    /// Parse a data row and classify it into its year partition.
    pub fn parse(&self, record: &StringRecord) -> Result<ServiceRequest, IngestError> {
        let cell = |idx: usize, column: &'static str| {
            record.get(idx).ok_or(IngestError::MissingValue { column })
        };
        let text = |idx: usize, column: &'static str| cell(idx, column).map(str::to_string);

        let id = parse_id("REQUEST_ID", cell(self.id, "REQUEST_ID")?)?;
        let placement = classify(
            cell(self.initiated, "DATE_INITIATED")?,
            cell(self.closed, "DATE_CLOSED")?,
        )
        .map_err(|source| IngestError::Partition { id, source })?;
        if placement.fell_back {
            debug!(id, year = %placement.year, "initiated predates 2000, partitioned by closed year");
        }

        Ok(ServiceRequest {
            id,
            initiated: placement.initiated,
            closed: placement.closed,
            year: placement.year,
            description: text(self.description, "DESCRIPTION")?,
            initiator: text(self.initiator, "INITIATED_BY")?,
            priority: text(self.priority, "PRIORITY")?,
            address: text(self.address, "ADDRESS")?,
            community: text(self.community, "COMMUNITY")?,
            district: text(self.district, "DISTRICT")?,
            category: text(self.category, "REQUEST_CATEGORY")?,
            resolution: text(self.resolution, "RESOLUTION")?,
            latitude: parse_coordinate("LATITUDE", cell(self.latitude, "LATITUDE")?)?,
            longitude: parse_coordinate("LONGITUDE", cell(self.longitude, "LONGITUDE")?)?,
            status: text(self.status, "STATUS")?,
            department: text(self.department, "DEPT_RESPONSIBILITY")?,
            work_order: text(self.work_order, "WORK_ORDER")?,
            project_name: text(self.project_name, "PROJECT_NAME")?,
        })
    }
}

fn parse_coordinate(column: &'static str, raw: &str) -> Result<Option<f64>, IngestError> {
    let raw_trimmed = raw.trim();
    if raw_trimmed.is_empty() {
        return Ok(None);
    }
    raw_trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|err| IngestError::InvalidValue {
            column,
            value: raw.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> StringRecord {
        StringRecord::from(REQUEST_HEADERS.to_vec())
    }

    fn row(id: &str, initiated: &str, closed: &str, status: &str) -> StringRecord {
        StringRecord::from(vec![
            id,
            initiated,
            closed,
            "Pothole",
            "Phone",
            "Normal",
            "1 Main St",
            "Halifax",
            "District 7",
            "Roads",
            "Filled",
            "44.6488",
            "-63.5752",
            status,
            "Public Works",
            "WO-1",
            "",
        ])
    }

    #[test]
    fn missing_columns_are_named() {
        let headers = StringRecord::from(
            REQUEST_HEADERS
                .iter()
                .copied()
                .filter(|name| *name != "WORK_ORDER")
                .collect::<Vec<_>>(),
        );
        let err = RequestColumns::resolve(&headers).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn { column: "WORK_ORDER" }));
    }

    #[test]
    fn reordered_columns_yield_identical_records() {
        let columns = RequestColumns::resolve(&header()).unwrap();
        let record = row("42", "3/5/2019 9:00:00 AM", "", "Open");
        let expected = columns.parse(&record).unwrap();

        let mut order: Vec<usize> = (0..REQUEST_HEADERS.len()).collect();
        order.reverse();
        order.swap(3, 9);
        let shuffled_header: StringRecord = order.iter().map(|&idx| REQUEST_HEADERS[idx]).collect();
        let shuffled_row: StringRecord = order.iter().map(|&idx| &record[idx]).collect();

        let shuffled = RequestColumns::resolve(&shuffled_header).unwrap();
        assert_ne!(shuffled, columns);
        assert_eq!(shuffled.parse(&shuffled_row).unwrap(), expected);
    }

    #[test]
    fn extra_columns_are_ignored() {
        let mut names: Vec<&str> = REQUEST_HEADERS.to_vec();
        names.insert(16, "ObjectId");
        let columns = RequestColumns::resolve(&StringRecord::from(names)).unwrap();
        assert_eq!(columns.project_name, 17);
    }

    #[test]
    fn parses_typed_values() {
        let columns = RequestColumns::resolve(&header()).unwrap();
        let request = columns
            .parse(&row("42", "3/5/2019 9:00:00 AM", "3/7/2019 4:15:00 PM", "Closed"))
            .unwrap();

        assert_eq!(request.id, 42);
        assert_eq!(request.year.get(), 2019);
        assert_eq!(request.initiated.to_rfc3339(), "2019-03-05T13:00:00+00:00");
        assert_eq!(
            request.closed.map(|at| at.to_rfc3339()),
            Some("2019-03-07T20:15:00+00:00".to_string())
        );
        assert_eq!(request.latitude, Some(44.6488));
        assert_eq!(request.status, "Closed");
        assert_eq!(request.project_name, "");
    }

    #[test]
    fn empty_coordinates_are_absent_but_garbage_is_fatal() {
        assert_eq!(parse_coordinate("LATITUDE", " ").unwrap(), None);
        assert!(matches!(
            parse_coordinate("LATITUDE", "north"),
            Err(IngestError::InvalidValue { column: "LATITUDE", .. })
        ));
    }

    #[test]
    fn bad_identifiers_and_timestamps_are_fatal() {
        let columns = RequestColumns::resolve(&header()).unwrap();
        assert!(matches!(
            columns.parse(&row("x1", "3/5/2019 9:00:00 AM", "", "Open")),
            Err(IngestError::InvalidValue { column: "REQUEST_ID", .. })
        ));
        assert!(matches!(
            columns.parse(&row("7", "1/1/1899 12:00:00 AM", "", "Open")),
            Err(IngestError::Partition { id: 7, .. })
        ));
    }
}
