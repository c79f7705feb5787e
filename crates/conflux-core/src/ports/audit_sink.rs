//! Audit storage port.

use async_trait::async_trait;

use super::StoreError;
use crate::domain::AuditEntry;

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one entry.
    async fn store(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Most recent entries, newest last. Sinks that cannot read back
    /// return an empty list.
    async fn recent(&self, _limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(Vec::new())
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn store(&self, _entry: AuditEntry) -> Result<(), StoreError> {
        Ok(())
    }
}
