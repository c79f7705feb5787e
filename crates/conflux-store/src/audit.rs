//! Audit sinks.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use conflux_core::AuditEntry;
use conflux_core::ports::{AuditSink, StoreError};

/// Default number of entries retained by [`MemoryAuditSink`].
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Ring buffer of the most recent entries.
pub struct MemoryAuditSink {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Number of retained entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn store(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = self.entries.lock().await;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.iter().skip(skip).cloned().collect())
    }
}

/// Appends one JSON document per line to a file.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesAuditSink {
    /// Open (or create) the log file in append mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::Internal(format!("open {}: {e}", path.display())))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn store(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut line =
            serde_json::to_vec(&entry).map_err(|e| StoreError::Internal(e.to_string()))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))
    }
}

/// Writes every entry to all inner sinks; reads come from the first one.
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn store(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut first_error = None;
        for (index, sink) in self.sinks.iter().enumerate() {
            if let Err(e) = sink.store(entry.clone()).await {
                tracing::warn!(sink = index, entry_id = %entry.id, error = %e, "Audit sink write failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        match self.sinks.first() {
            Some(sink) => sink.recent(limit).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conflux_core::AuditResult;
    use serde_json::json;
    use uuid::Uuid;

    fn entry(target: &str) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_type: "tools/call".into(),
            client_id: "anonymous".into(),
            server_id: Some("alpha".into()),
            server_name: Some("alpha".into()),
            target: Some(target.into()),
            params: json!({}),
            result: AuditResult::Success,
            duration_ms: 1,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_drops_oldest() {
        let sink = MemoryAuditSink::new(2);
        for target in ["a", "b", "c"] {
            sink.store(entry(target)).await.unwrap();
        }

        let recent = sink.recent(10).await.unwrap();
        let targets: Vec<_> = recent.iter().filter_map(|e| e.target.as_deref()).collect();
        assert_eq!(targets, ["b", "c"]);
    }

    #[tokio::test]
    async fn test_memory_sink_recent_limit_keeps_newest() {
        let sink = MemoryAuditSink::default();
        for target in ["a", "b", "c"] {
            sink.store(entry(target)).await.unwrap();
        }

        let recent = sink.recent(1).await.unwrap();
        assert_eq!(recent[0].target.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = JsonLinesAuditSink::open(&path).await.unwrap();
        sink.store(entry("search")).await.unwrap();
        sink.store(entry("fetch")).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<AuditEntry> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].target.as_deref(), Some("fetch"));
    }

    #[tokio::test]
    async fn test_fanout_reads_from_first_sink() {
        let memory = Arc::new(MemoryAuditSink::default());
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(
            JsonLinesAuditSink::open(dir.path().join("audit.jsonl"))
                .await
                .unwrap(),
        );
        let sinks = vec![memory.clone() as Arc<dyn AuditSink>, file];
        let fanout = FanoutAuditSink::new(sinks);

        fanout.store(entry("search")).await.unwrap();

        assert_eq!(memory.len().await, 1);
        assert_eq!(fanout.recent(5).await.unwrap().len(), 1);
    }

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn store(&self, _entry: AuditEntry) -> Result<(), StoreError> {
            Err(StoreError::Internal("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_fanout_keeps_writing_after_a_sink_fails() {
        let memory = Arc::new(MemoryAuditSink::default());
        let broken: Arc<dyn AuditSink> = Arc::new(BrokenSink);
        let fanout = FanoutAuditSink::new(vec![broken, memory.clone() as Arc<dyn AuditSink>]);

        let err = fanout.store(entry("search")).await.unwrap_err();
        assert!(matches!(err, StoreError::Internal(msg) if msg == "disk full"));
        assert_eq!(memory.len().await, 1);
    }
}
