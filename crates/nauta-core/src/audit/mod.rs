//! Trilha de auditoria das operações mutáveis.
//!
//! `submit` nunca bloqueia: o registro entra numa fila limitada e uma
//! tarefa em segundo plano grava em lotes no [`AuditSink`]. Falhas de
//! gravação são repetidas com backoff e apenas registradas em log. Quando a
//! fila enche, o registro mais antigo ainda não gravado é descartado.
//!
//! Sinks disponíveis:
//!
//! - [`SqliteAuditSink`]: tabela append-only em SQLite
//! - [`JsonlAuditSink`]: arquivo JSON por linha
//! - [`MemoryAuditSink`]: em memória, para testes

pub mod jsonl;
pub mod memory;
pub mod sqlite;

pub use jsonl::JsonlAuditSink;
pub use memory::MemoryAuditSink;
pub use sqlite::SqliteAuditSink;

use crate::config::{AuditSettings, AuditSinkKind};
use crate::model::OperationRecord;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tentativas de gravação de um lote depois que o encerramento foi pedido
const SHUTDOWN_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("falha de E/S no sink de auditoria: {0}")]
    Io(#[from] std::io::Error),

    #[error("falha no banco de auditoria: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("falha de serialização: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink de auditoria indisponível: {0}")]
    Unavailable(String),
}

/// Destino persistente dos registros de operação
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write_batch(&self, records: &[OperationRecord]) -> Result<(), AuditError>;

    /// Registros mais recentes, do mais antigo para o mais novo
    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, AuditError>;
}

/// Cria o sink configurado
pub fn open_sink(settings: &AuditSettings) -> Result<Arc<dyn AuditSink>, AuditError> {
    let sink: Arc<dyn AuditSink> = match settings.sink {
        AuditSinkKind::Sqlite => Arc::new(SqliteAuditSink::open(settings.resolved_path())?),
        AuditSinkKind::Jsonl => Arc::new(JsonlAuditSink::new(settings.resolved_path())?),
        AuditSinkKind::Memory => Arc::new(MemoryAuditSink::new()),
    };
    Ok(sink)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub queued: usize,
    pub written: u64,
    pub dropped: u64,
    pub failed_writes: u64,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from_settings(&AuditSettings::default())
    }
}

impl RecorderConfig {
    pub fn from_settings(settings: &AuditSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity.max(1),
            batch_size: settings.batch_size.max(1),
            retry: RetryPolicy {
                max_retries: u32::MAX,
                base: Duration::from_millis(settings.retry_base_ms),
                factor: 2,
                cap: Duration::from_millis(settings.retry_cap_ms),
            },
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<OperationRecord>>,
    capacity: usize,
    /// Acorda o worker quando há registros ou encerramento
    wake: Notify,
    /// Avisa `flush` quando o worker esvazia a fila
    idle: Notify,
    in_flight: AtomicBool,
    closed: AtomicBool,
    written: AtomicU64,
    dropped: AtomicU64,
    failed_writes: AtomicU64,
}

impl Shared {
    fn is_drained(&self) -> bool {
        self.queue.lock().is_empty() && !self.in_flight.load(Ordering::SeqCst)
    }
}

pub struct AuditRecorder {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditRecorder {
    /// Inicia o worker de gravação. Precisa de um runtime tokio ativo.
    pub fn start(sink: Arc<dyn AuditSink>, config: RecorderConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.queue_capacity.min(4096))),
            capacity: config.queue_capacity,
            wake: Notify::new(),
            idle: Notify::new(),
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
        });
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), sink, config));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enfileira o registro sem esperar pela gravação.
    pub fn submit(&self, record: OperationRecord) {
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(operation = %record.id, "auditoria encerrada, registro descartado");
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                if let Some(oldest) = queue.pop_front() {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(operation = %oldest.id, "fila de auditoria cheia, registro mais antigo descartado");
                }
            }
            queue.push_back(record);
        }
        self.shared.wake.notify_one();
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            queued: self.shared.queue.lock().len(),
            written: self.shared.written.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            failed_writes: self.shared.failed_writes.load(Ordering::Relaxed),
        }
    }

    /// Espera até que tudo o que foi enfileirado tenha sido processado.
    pub async fn flush(&self) {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.shared.is_drained() {
                return;
            }
            idle.await;
        }
    }

    /// Para de aceitar registros, grava o que restou e encerra o worker.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "worker de auditoria terminou com erro");
            }
        }
        info!(stats = ?self.stats(), "auditoria encerrada");
    }
}

impl Drop for AuditRecorder {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }
}

async fn run_worker(shared: Arc<Shared>, sink: Arc<dyn AuditSink>, config: RecorderConfig) {
    debug!(sink = sink.name(), "worker de auditoria iniciado");
    loop {
        let batch: Vec<OperationRecord> = {
            let mut queue = shared.queue.lock();
            let n = queue.len().min(config.batch_size);
            if n > 0 {
                shared.in_flight.store(true, Ordering::SeqCst);
            }
            queue.drain(..n).collect()
        };

        if batch.is_empty() {
            shared.idle.notify_waiters();
            if shared.closed.load(Ordering::SeqCst) {
                break;
            }
            shared.wake.notified().await;
            continue;
        }

        write_with_retry(&shared, sink.as_ref(), &batch, &config.retry).await;
        shared.in_flight.store(false, Ordering::SeqCst);
    }
    debug!(sink = sink.name(), "worker de auditoria finalizado");
}

async fn write_with_retry(
    shared: &Shared,
    sink: &dyn AuditSink,
    batch: &[OperationRecord],
    retry: &RetryPolicy,
) {
    let mut attempt = 0u32;
    loop {
        match sink.write_batch(batch).await {
            Ok(()) => {
                shared.written.fetch_add(batch.len() as u64, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                attempt += 1;
                shared.failed_writes.fetch_add(1, Ordering::Relaxed);
                error!(
                    sink = sink.name(),
                    attempt,
                    records = batch.len(),
                    error = %e,
                    "falha ao gravar auditoria"
                );
                if shared.closed.load(Ordering::SeqCst) && attempt >= SHUTDOWN_ATTEMPTS {
                    shared.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                    warn!(records = batch.len(), "lote de auditoria descartado no encerramento");
                    return;
                }
                tokio::time::sleep(retry.backoff(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, BackendRef, ResourceKind, TargetRef};

    fn record(id: &str) -> OperationRecord {
        let mut record = OperationRecord::begin(
            Action::Stop,
            TargetRef {
                kind: ResourceKind::Container,
                id: id.to_string(),
                backend_ref: BackendRef::new("local"),
            },
            "test",
        );
        record.mark_success().unwrap();
        record
    }

    fn config(capacity: usize) -> RecorderConfig {
        RecorderConfig {
            queue_capacity: capacity,
            batch_size: 8,
            retry: RetryPolicy {
                max_retries: u32::MAX,
                base: Duration::from_millis(5),
                factor: 2,
                cap: Duration::from_millis(20),
            },
        }
    }

    #[tokio::test]
    async fn test_records_reach_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::start(sink.clone(), config(16));
        recorder.submit(record("a"));
        recorder.submit(record("b"));
        recorder.flush().await;

        let ids: Vec<_> = sink.records().iter().map(|r| r.target.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(recorder.stats().written, 2);
    }

    #[tokio::test]
    async fn test_failing_sink_retries_without_blocking_submit() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.set_available(false);
        let recorder = AuditRecorder::start(sink.clone(), config(16));

        recorder.submit(record("a"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(recorder.stats().failed_writes >= 1);
        assert!(sink.records().is_empty());

        sink.set_available(true);
        recorder.flush().await;
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.set_available(false);
        let recorder = AuditRecorder::start(sink.clone(), config(2));

        // O worker pode já ter retirado "a" para gravar; as demais ficam na fila
        recorder.submit(record("a"));
        tokio::task::yield_now().await;
        for id in ["b", "c", "d"] {
            recorder.submit(record(id));
        }
        let stats = recorder.stats();
        assert_eq!(stats.queued, 2);
        assert!(stats.dropped >= 1);

        sink.set_available(true);
        recorder.flush().await;
        let ids: Vec<_> = sink.records().iter().map(|r| r.target.id.clone()).collect();
        assert!(ids.ends_with(&["c".to_string(), "d".to_string()]));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_rejects_new_records() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::start(sink.clone(), config(16));
        recorder.submit(record("a"));
        recorder.shutdown().await;
        assert_eq!(sink.records().len(), 1);

        recorder.submit(record("b"));
        assert_eq!(recorder.stats().dropped, 1);
        assert_eq!(sink.records().len(), 1);
    }
}
