//! Snapshot sink boundary and implementations
//!
//! A sink receives an immutable [`StatsSnapshot`] on every flush and is
//! responsible for durable storage. The processor only cares about
//! success or failure; retry queues, if any, belong to the sink.

use crate::error::SinkError;
use crate::state::StatsSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Destination for flushed snapshots
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write_snapshot(&self, snapshot: &StatsSnapshot) -> Result<(), SinkError>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// One flushed snapshot as persisted by [`LocalFileSink`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushRecord {
    pub id: Uuid,
    pub flushed_at: DateTime<Utc>,
    pub stats: StatsSnapshot,
}

/// Keeps every flushed snapshot in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    snapshots: Arc<Mutex<Vec<StatsSnapshot>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn latest(&self) -> Option<StatsSnapshot> {
        self.snapshots.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotSink for InMemorySink {
    async fn write_snapshot(&self, snapshot: &StatsSnapshot) -> Result<(), SinkError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Emits a one-line summary of every flush through `tracing`
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl SnapshotSink for LogSink {
    async fn write_snapshot(&self, snapshot: &StatsSnapshot) -> Result<(), SinkError> {
        tracing::info!(
            "Flush: processed={} skipped={} pages={} products={} revenue_buckets={} (total {:.2}) queries={}",
            snapshot.events_processed,
            snapshot.events_skipped,
            snapshot.page_views.len(),
            snapshot.product_interest.len(),
            snapshot.revenue_by_hour.len(),
            snapshot.total_revenue(),
            snapshot.search_queries.len()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Writes each flush as a JSON file and keeps the newest `max_snapshots`
pub struct LocalFileSink {
    dir: PathBuf,
    max_snapshots: usize,
}

const FLUSH_FILE_PREFIX: &str = "flush_";
const FLUSH_FILE_EXTENSION: &str = "json";

impl LocalFileSink {
    /// Create the sink, making sure `dir` exists
    pub fn new(dir: impl Into<PathBuf>, max_snapshots: usize) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_snapshots: max_snapshots.max(1) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flush files currently on disk, oldest first
    pub fn list_records(&self) -> Result<Vec<PathBuf>, SinkError> {
        list_flush_files(&self.dir)
    }

    /// Load the most recent flush record, if any
    pub fn load_latest(&self) -> Result<Option<FlushRecord>, SinkError> {
        match self.list_records()?.last() {
            Some(path) => {
                let bytes = std::fs::read(path)?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

}

fn list_flush_files(dir: &Path) -> Result<Vec<PathBuf>, SinkError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_flush_file(path))
        .collect();
    // File names start with a fixed-width timestamp, so lexical order is chronological
    paths.sort();
    Ok(paths)
}

fn write_record(dir: &Path, record: &FlushRecord) -> Result<PathBuf, SinkError> {
    let filename = format!(
        "{}{}_{}.{}",
        FLUSH_FILE_PREFIX,
        record.flushed_at.format("%Y%m%dT%H%M%S%.6fZ"),
        record.id.simple(),
        FLUSH_FILE_EXTENSION
    );
    let path = dir.join(filename);
    let tmp_path = path.with_extension("tmp");

    let file = std::fs::File::create(&tmp_path)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, record)?;
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp_path, &path)?;

    Ok(path)
}

fn prune(dir: &Path, max_snapshots: usize) -> Result<(), SinkError> {
    let records = list_flush_files(dir)?;
    if records.len() <= max_snapshots {
        return Ok(());
    }

    let excess = records.len() - max_snapshots;
    for path in records.iter().take(excess) {
        std::fs::remove_file(path)?;
        tracing::debug!("Removed old flush record: {:?}", path);
    }
    Ok(())
}

fn is_flush_file(path: &Path) -> bool {
    let named_like_flush = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FLUSH_FILE_PREFIX));
    named_like_flush && path.extension().and_then(|ext| ext.to_str()) == Some(FLUSH_FILE_EXTENSION)
}

#[async_trait]
impl SnapshotSink for LocalFileSink {
    async fn write_snapshot(&self, snapshot: &StatsSnapshot) -> Result<(), SinkError> {
        let record = FlushRecord { id: Uuid::new_v4(), flushed_at: Utc::now(), stats: snapshot.clone() };
        let record_id = record.id;
        let dir = self.dir.clone();
        let max_snapshots = self.max_snapshots;

        // Blocking filesystem work runs off the runtime workers
        let path = tokio::task::spawn_blocking(move || {
            let path = write_record(&dir, &record)?;
            if let Err(e) = prune(&dir, max_snapshots) {
                tracing::warn!("Failed to prune old flush records in {:?}: {}", dir, e);
            }
            Ok::<_, SinkError>(path)
        })
        .await
        .map_err(|e| SinkError::Rejected(format!("flush writer task failed: {}", e)))??;

        tracing::info!(
            "Wrote flush record {} ({} events processed) to {:?}",
            record_id,
            snapshot.events_processed,
            path
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "local-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(processed: u64) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot { events_processed: processed, ..Default::default() };
        snapshot.page_views.insert("/home".to_string(), processed);
        snapshot
    }

    #[tokio::test]
    async fn test_in_memory_sink_keeps_history() {
        let sink = InMemorySink::new();
        sink.write_snapshot(&snapshot(1)).await.unwrap();
        sink.write_snapshot(&snapshot(2)).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.latest().unwrap().events_processed, 2);
    }

    #[test]
    fn test_log_sink_accepts_snapshot() {
        tokio_test::assert_ok!(tokio_test::block_on(LogSink.write_snapshot(&snapshot(3))));
    }

    #[tokio::test]
    async fn test_local_file_sink_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let sink = LocalFileSink::new(temp_dir.path().join("flushes"), 5).unwrap();
        assert!(sink.load_latest().unwrap().is_none());

        sink.write_snapshot(&snapshot(7)).await.unwrap();

        let record = sink.load_latest().unwrap().unwrap();
        assert_eq!(record.stats, snapshot(7));
        assert_eq!(sink.list_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_file_sink_prunes_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let sink = LocalFileSink::new(temp_dir.path(), 2).unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "not a flush").unwrap();

        for processed in 1..=4 {
            sink.write_snapshot(&snapshot(processed)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        assert_eq!(sink.list_records().unwrap().len(), 2);
        assert_eq!(sink.load_latest().unwrap().unwrap().stats.events_processed, 4);
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_prune_failure_does_not_fail_the_write() {
        let temp_dir = TempDir::new().unwrap();
        let sink = LocalFileSink::new(temp_dir.path(), 1).unwrap();
        // Sorts before any real record and cannot be removed with remove_file
        let blocker = temp_dir.path().join("flush_00000000T000000.000000Z_blocker.json");
        std::fs::create_dir(&blocker).unwrap();

        sink.write_snapshot(&snapshot(9)).await.unwrap();

        assert!(blocker.exists());
        assert_eq!(sink.load_latest().unwrap().unwrap().stats.events_processed, 9);
    }
}
