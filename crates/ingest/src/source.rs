use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::record::{IngestRecord, RecordError};

/// Item produced by a source, in file order
#[derive(Debug)]
pub enum SourceItem {
    Record(IngestRecord),
    Malformed { line: u64, error: RecordError },
    /// The file cannot be read any further
    Failed(String),
}

/// Reads a CSV file on a blocking thread.
///
/// Parsed rows go through a channel of `buffer_size` items; the reader
/// blocks while the channel is full and stops once the receiver is dropped.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    has_headers: bool,
    buffer_size: usize,
}

impl CsvSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            has_headers: false,
            buffer_size: 1024,
        }
    }

    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start reading; items arrive on the returned receiver
    pub fn spawn(self) -> (mpsc::Receiver<SourceItem>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let handle = tokio::task::spawn_blocking(move || self.read_into(tx));
        (rx, handle)
    }

    fn read_into(self, tx: mpsc::Sender<SourceItem>) {
        let mut reader = match ReaderBuilder::new()
            .has_headers(self.has_headers)
            .flexible(true)
            .trim(Trim::All)
            .comment(Some(b'#'))
            .from_path(&self.path)
        {
            Ok(reader) => reader,
            Err(e) => {
                let _ = tx.blocking_send(SourceItem::Failed(e.to_string()));
                return;
            }
        };

        let source = self.path.display().to_string();
        let mut row = StringRecord::new();
        let mut rows = 0u64;
        loop {
            let item = match reader.read_record(&mut row) {
                Ok(false) => break,
                Ok(true) => {
                    rows += 1;
                    let line = row.position().map_or(rows, |p| p.line());
                    match IngestRecord::parse(line, &row) {
                        Ok(record) => SourceItem::Record(record.keyed_by_source(&source)),
                        Err(error) => SourceItem::Malformed { line, error },
                    }
                }
                Err(e) => match e.kind() {
                    csv::ErrorKind::Utf8 { pos, err } => {
                        rows += 1;
                        SourceItem::Malformed {
                            line: pos.as_ref().map_or(rows, |p| p.line()),
                            error: RecordError::Unreadable(err.to_string()),
                        }
                    }
                    _ => SourceItem::Failed(e.to_string()),
                },
            };

            let fatal = matches!(item, SourceItem::Failed(_));
            if tx.blocking_send(item).is_err() {
                debug!(path = %self.path.display(), "Consumer gone, stopping source");
                return;
            }
            if fatal {
                warn!(path = %self.path.display(), "Source stopped on read error");
                return;
            }
        }
        debug!(path = %self.path.display(), rows, "Source exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(source: CsvSource) -> Vec<SourceItem> {
        let (mut rx, handle) = source.spawn();
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        handle.await.unwrap();
        items
    }

    #[tokio::test]
    async fn test_reads_records_skipping_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# kind, entity, ...").unwrap();
        writeln!(file, "PLACE, acct1, BUY, 10, 100.0").unwrap();
        writeln!(file, "CANCEL, acct1").unwrap();
        writeln!(file, "CANCEL, acct1, order-1").unwrap();

        let items = collect(CsvSource::new(file.path())).await;
        assert_eq!(items.len(), 3);
        match &items[0] {
            SourceItem::Record(r) => assert_eq!(r.line, 2),
            other => panic!("unexpected item {other:?}"),
        }
        match &items[1] {
            SourceItem::Malformed { line, error } => {
                assert_eq!(*line, 3);
                assert!(matches!(error, RecordError::ColumnCount { .. }));
            }
            other => panic!("unexpected item {other:?}"),
        }
        assert!(matches!(&items[2], SourceItem::Record(r) if r.line == 4));
    }

    #[tokio::test]
    async fn test_header_row_skipped_when_configured() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "kind,entity,order_id").unwrap();
        writeln!(file, "CANCEL,acct1,order-1").unwrap();

        let items = collect(CsvSource::new(file.path()).with_headers(true)).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], SourceItem::Record(_)));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let items = collect(CsvSource::new("/nonexistent/kestrel/input.csv")).await;
        assert!(matches!(items.as_slice(), [SourceItem::Failed(_)]));
    }
}
