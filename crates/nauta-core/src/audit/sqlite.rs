//! Sink de auditoria em SQLite.
//!
//! A tabela é somente de inserção. As colunas principais ficam separadas para
//! consulta manual; o registro completo vai em `payload` como JSON.

use super::{AuditError, AuditSink};
use crate::model::OperationRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS operation_records (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    operation_type TEXT NOT NULL,
    resource_kind  TEXT NOT NULL,
    resource_id    TEXT NOT NULL,
    backend_id     TEXT NOT NULL,
    namespace      TEXT,
    status         TEXT NOT NULL,
    error_kind     TEXT,
    error_message  TEXT,
    initiator      TEXT NOT NULL,
    requested_at   TEXT NOT NULL,
    completed_at   TEXT,
    attempts       INTEGER NOT NULL,
    payload        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_operation_records_target
    ON operation_records (backend_id, resource_kind, resource_id);
";

pub struct SqliteAuditSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "banco de auditoria aberto");
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn insert_batch(conn: &mut Connection, records: &[OperationRecord]) -> Result<(), AuditError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO operation_records (
                id, operation_type, resource_kind, resource_id, backend_id, namespace,
                status, error_kind, error_message, initiator, requested_at, completed_at,
                attempts, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;
        for record in records {
            let payload = serde_json::to_string(record)?;
            let inserted = stmt.execute(params![
                record.id,
                record.operation_type.as_str(),
                record.target.kind.as_str(),
                record.target.id,
                record.target.backend_ref.backend_id,
                record.target.backend_ref.namespace,
                record.status.to_string(),
                record.error_kind.map(|k| k.to_string()),
                record.error_message,
                record.initiator,
                record.requested_at.to_rfc3339(),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.attempts,
                payload,
            ])?;
            if inserted == 0 {
                warn!(operation = %record.id, "registro de auditoria já existia");
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn select_recent(conn: &Connection, limit: usize) -> Result<Vec<OperationRecord>, AuditError> {
    let mut stmt =
        conn.prepare("SELECT payload FROM operation_records ORDER BY seq DESC LIMIT ?1")?;
    let payloads = stmt
        .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = payloads
        .iter()
        .map(|p| serde_json::from_str::<OperationRecord>(p))
        .collect::<Result<Vec<_>, _>>()?;
    records.reverse();
    Ok(records)
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn write_batch(&self, records: &[OperationRecord]) -> Result<(), AuditError> {
        let conn = Arc::clone(&self.conn);
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            insert_batch(&mut guard, &records)
        })
        .await
        .map_err(|e| AuditError::Unavailable(format!("tarefa de escrita abortada: {e}")))?
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, AuditError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            select_recent(&guard, limit)
        })
        .await
        .map_err(|e| AuditError::Unavailable(format!("tarefa de leitura abortada: {e}")))?
    }
}
