use super::{AuditError, AuditSink};
use crate::model::OperationRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sink em memória. Pode simular indisponibilidade.
#[derive(Debug)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<OperationRecord>>,
    available: AtomicBool,
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OperationRecord> {
        self.records.lock().clone()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_batch(&self, records: &[OperationRecord]) -> Result<(), AuditError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("sink em memória desligado".to_string()));
        }
        self.records.lock().extend_from_slice(records);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, AuditError> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}
