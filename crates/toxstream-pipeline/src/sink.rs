//! Table sink
//!
//! Renders joined records to the single-column table row shape and appends
//! them through a `TableWriter` in streaming-insert style: one row at a time,
//! low latency, no dedup key, and duplicate rows under retry are possible.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toxstream_core::{Error, JoinedRecord, Result};
use tracing::{debug, warn};

/// A row of the single-column output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    /// The rendered joined record
    pub data_col: String,
}

/// Appends rows to the warehouse table.
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Append one row
    async fn append(&self, row: TableRow) -> Result<()>;

    /// Fully qualified table name, for logs
    fn table(&self) -> &str;
}

/// In-memory table, for tests and dry runs.
pub struct MemoryTableWriter {
    table: String,
    rows: Mutex<Vec<TableRow>>,
}

impl MemoryTableWriter {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the appended rows
    pub fn rows(&self) -> Vec<TableRow> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl TableWriter for MemoryTableWriter {
    async fn append(&self, row: TableRow) -> Result<()> {
        self.rows.lock().push(row);
        Ok(())
    }

    fn table(&self) -> &str {
        &self.table
    }
}

/// Appends rows as JSON lines to a local file, flushing per row.
pub struct JsonlTableWriter {
    table: String,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlTableWriter {
    /// Open (or create) the backing file in append mode.
    pub async fn open(table: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::sink(format!("opening {path:?}: {e}")))?;

        Ok(Self {
            table: table.into(),
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl TableWriter for JsonlTableWriter {
    async fn append(&self, row: TableRow) -> Result<()> {
        let mut line = serde_json::to_vec(&row)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| Error::sink(format!("appending to {}: {e}", self.table)))?;
        file.flush()
            .await
            .map_err(|e| Error::sink(format!("flushing {}: {e}", self.table)))?;
        Ok(())
    }

    fn table(&self) -> &str {
        &self.table
    }
}

/// Stage draining joined records into a table writer.
pub struct SinkStage {
    writer: Arc<dyn TableWriter>,
}

impl SinkStage {
    pub fn new(writer: Arc<dyn TableWriter>) -> Self {
        Self { writer }
    }

    /// Spawn the sink task.
    pub fn spawn(self, mut input: mpsc::Receiver<JoinedRecord>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(record) = input.recv().await {
                let row = match record.render() {
                    Ok(data_col) => TableRow { data_col },
                    Err(e) => {
                        counter!("toxstream_element_errors_total", "stage" => "sink").increment(1);
                        warn!(key = %record.key, error = %e, "failed to render joined record");
                        continue;
                    }
                };

                if let Err(e) = self.writer.append(row).await {
                    counter!("toxstream_element_errors_total", "stage" => "sink").increment(1);
                    warn!(table = %self.writer.table(), error = %e, "failed to append row");
                    continue;
                }

                counter!("toxstream_rows_total").increment(1);
            }

            debug!(table = %self.writer.table(), "sink stage finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use toxstream_core::Prediction;

    #[tokio::test]
    async fn test_sink_appends_rendered_rows() {
        let writer = Arc::new(MemoryTableWriter::new("p:demo.tox"));
        let (tx, rx) = mpsc::channel(8);

        let handle = SinkStage::new(Arc::clone(&writer) as Arc<dyn TableWriter>).spawn(rx);

        let mut streams = BTreeMap::new();
        streams.insert(
            "gaming".to_string(),
            vec![Prediction {
                key: "u1".to_string(),
                score: -0.9,
                model: "gaming".to_string(),
                event_time: chrono::Utc::now(),
            }],
        );
        streams.insert("movie".to_string(), Vec::new());

        tx.send(JoinedRecord {
            key: "u1".to_string(),
            window: 7,
            streams,
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let rows = writer.rows();
        assert_eq!(rows.len(), 1);

        // The single textual field round-trips back to the joined record.
        let parsed: JoinedRecord = serde_json::from_str(&rows[0].data_col).unwrap();
        assert_eq!(parsed.key, "u1");
        assert_eq!(parsed.window, 7);
        assert!(parsed.streams["movie"].is_empty());
    }
}
