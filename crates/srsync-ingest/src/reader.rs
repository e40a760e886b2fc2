//! Async-facing wrapper over the blocking `csv` reader.
//!
//! The reader runs on a blocking thread and reads the async byte source through
//! [`SyncIoBridge`]; records cross over a bounded channel so the consumer pulls
//! them one at a time.

use csv::StringRecord;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use crate::IngestError;

const RECORD_BUFFER: usize = 256;

/// Row-level defects that leave the reader positioned at the next row.
pub fn is_malformed_row(err: &csv::Error) -> bool {
    matches!(
        err.kind(),
        csv::ErrorKind::UnequalLengths { .. } | csv::ErrorKind::Utf8 { .. }
    )
}

#[derive(Debug)]
pub struct CsvRecords {
    headers: StringRecord,
    rx: mpsc::Receiver<Result<StringRecord, csv::Error>>,
    producer: Option<JoinHandle<()>>,
}

impl CsvRecords {
    /// Start reading `source` and consume its header row.
    pub async fn open<R>(source: R) -> Result<Self, IngestError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let bridge = SyncIoBridge::new(source);
        let (tx, mut rx) = mpsc::channel(RECORD_BUFFER);
        let producer = tokio::task::spawn_blocking(move || produce(bridge, tx));

        let headers = match rx.recv().await {
            Some(Ok(headers)) => strip_bom(&headers),
            Some(Err(err)) => return Err(IngestError::Csv(err)),
            None => {
                surface_panic(producer).await?;
                return Err(IngestError::Empty);
            }
        };

        Ok(Self {
            headers,
            rx,
            producer: Some(producer),
        })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Next data row, or `None` once the input is exhausted.
    pub async fn next_record(&mut self) -> Option<Result<StringRecord, IngestError>> {
        match self.rx.recv().await {
            Some(record) => Some(record.map_err(IngestError::Csv)),
            None => {
                let producer = self.producer.take()?;
                surface_panic(producer).await.err().map(Err)
            }
        }
    }
}

fn produce<R: std::io::Read>(source: R, tx: mpsc::Sender<Result<StringRecord, csv::Error>>) {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(source);

    for result in reader.records() {
        let fatal = matches!(&result, Err(err) if !is_malformed_row(err));
        if tx.blocking_send(result).is_err() {
            debug!("csv consumer went away, stopping reader");
            return;
        }
        if fatal {
            return;
        }
    }
}

async fn surface_panic(producer: JoinHandle<()>) -> Result<(), IngestError> {
    producer
        .await
        .map_err(|err| IngestError::Reader(err.to_string()))
}

fn strip_bom(headers: &StringRecord) -> StringRecord {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if idx == 0 {
                name.trim_start_matches('\u{feff}')
            } else {
                name
            }
        })
        .collect()
}
