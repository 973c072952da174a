//! Sink de auditoria em arquivo, um registro JSON por linha

use super::{AuditError, AuditSink};
use crate::model::OperationRecord;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub struct JsonlAuditSink {
    path: Arc<PathBuf>,
}

impl JsonlAuditSink {
    /// Cria o diretório do arquivo se necessário
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append(path: &Path, records: &[OperationRecord]) -> Result<(), AuditError> {
    let mut buffer = String::new();
    for record in records {
        buffer.push_str(&serde_json::to_string(record)?);
        buffer.push('\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    // Linha truncada por uma escrita anterior interrompida
    if !ends_with_newline(&mut file)? {
        buffer.insert(0, '\n');
    }
    // Uma única escrita por lote
    file.write_all(buffer.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Um lote reenviado após escrita parcial repete linhas; a primeira
/// ocorrência de cada id de operação é a que vale.
fn ends_with_newline(file: &mut File) -> Result<bool, AuditError> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn read_tail(path: &Path, limit: usize) -> Result<Vec<OperationRecord>, AuditError> {
    if !path.exists() || limit == 0 {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut tail: VecDeque<OperationRecord> = VecDeque::with_capacity(limit.min(1024));
    let mut seen = HashSet::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<OperationRecord>(&line) {
            Ok(record) => {
                if seen.contains(&record.id) {
                    continue;
                }
                if tail.len() == limit {
                    if let Some(evicted) = tail.pop_front() {
                        seen.remove(&evicted.id);
                    }
                }
                seen.insert(record.id.clone());
                tail.push_back(record);
            }
            Err(e) => warn!(line = number + 1, error = %e, "linha de auditoria inválida ignorada"),
        }
    }
    Ok(tail.into())
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn write_batch(&self, records: &[OperationRecord]) -> Result<(), AuditError> {
        let path = Arc::clone(&self.path);
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || append(&path, &records))
            .await
            .map_err(|e| AuditError::Unavailable(format!("tarefa de escrita abortada: {e}")))?
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, AuditError> {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || read_tail(&path, limit))
            .await
            .map_err(|e| AuditError::Unavailable(format!("tarefa de leitura abortada: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, BackendRef, ResourceKind, TargetRef};

    fn record(id: &str) -> OperationRecord {
        OperationRecord::begin(
            Action::Delete,
            TargetRef {
                kind: ResourceKind::Volume,
                id: id.to_string(),
                backend_ref: BackendRef::new("local"),
            },
            "test",
        )
    }

    #[tokio::test]
    async fn test_append_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("sub").join("audit.jsonl")).unwrap();

        sink.write_batch(&[record("a"), record("b")]).await.unwrap();
        sink.write_batch(&[record("c")]).await.unwrap();

        let recent = sink.recent(2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.target.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_resent_batch_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("audit.jsonl")).unwrap();
        let batch = [record("a"), record("b"), record("c")];

        // Escrita interrompida no meio de "b", depois o lote inteiro de novo
        let mut partial = serde_json::to_string(&batch[0]).unwrap();
        partial.push('\n');
        let second = serde_json::to_string(&batch[1]).unwrap();
        partial.push_str(&second[..second.len() / 2]);
        std::fs::write(sink.path(), partial).unwrap();
        sink.write_batch(&batch).await.unwrap();

        let recent = sink.recent(10).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.target.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.ends_with('\n'));

        let last_two = sink.recent(2).await.unwrap();
        let ids: Vec<_> = last_two.iter().map(|r| r.target.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("audit.jsonl")).unwrap();
        assert!(sink.recent(10).await.unwrap().is_empty());
    }
}
