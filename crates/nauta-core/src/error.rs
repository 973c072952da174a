//! Taxonomia de erros do núcleo de gerenciamento de recursos

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categoria de uma falha, independente do backend que a produziu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Backend inalcançável
    Connection,
    /// Chamada excedeu o tempo limite
    Timeout,
    /// Recurso ou backend inexistente
    NotFound,
    /// Ação ilegal, estado inválido ou registro malformado
    Validation,
    /// Backend recusou a operação por autorização
    Permission,
}

impl ErrorKind {
    /// Falhas transitórias são elegíveis a retry no dispatcher.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Connection | ErrorKind::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Permission => write!(f, "permission"),
        }
    }
}

/// Erro tipado do núcleo. Sempre carrega a mensagem bruta do backend.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoreError {
    #[error("erro de conexão: {message}")]
    Connection { message: String },

    #[error("tempo esgotado após {duration_ms}ms: {message}")]
    Timeout { duration_ms: u64, message: String },

    #[error("não encontrado: {message}")]
    NotFound { message: String },

    #[error("validação: {message}")]
    Validation { message: String },

    #[error("permissão negada: {message}")]
    Permission { message: String },
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Trechos de mensagem que indicam falha de rede transitória.
const TRANSIENT_SIGNALS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "connection aborted",
    "broken pipe",
    "unreachable",
    "dns error",
    "failed to lookup address",
    "unexpected eof",
    "temporarily unavailable",
    "service unavailable",
    "no route to host",
];

impl CoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        CoreError::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(duration_ms: u64, message: impl Into<String>) -> Self {
        CoreError::Timeout {
            duration_ms,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        CoreError::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        CoreError::Permission {
            message: message.into(),
        }
    }

    pub fn of_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        match kind {
            ErrorKind::Connection => Self::connection(message),
            ErrorKind::Timeout => Self::timeout(0, message),
            ErrorKind::NotFound => Self::not_found(message),
            ErrorKind::Validation => Self::validation(message),
            ErrorKind::Permission => Self::permission(message),
        }
    }

    /// Classifica uma falha ambígua do adapter.
    ///
    /// Só vira `Connection` quando a mensagem traz um sinal de rede
    /// transitório; caso contrário é tratada como `Validation`.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if TRANSIENT_SIGNALS.iter().any(|s| lowered.contains(s)) {
            CoreError::Connection { message }
        } else {
            CoreError::Validation { message }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Connection { .. } => ErrorKind::Connection,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Validation { .. } => ErrorKind::Validation,
            CoreError::Permission { .. } => ErrorKind::Permission,
        }
    }

    /// Mensagem bruta, sem o prefixo da categoria.
    pub fn message(&self) -> &str {
        match self {
            CoreError::Connection { message }
            | CoreError::Timeout { message, .. }
            | CoreError::NotFound { message }
            | CoreError::Validation { message }
            | CoreError::Permission { message } => message,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient_signal() {
        let err = CoreError::classify("error trying to connect: Connection refused (os error 111)");
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_defaults_to_validation() {
        let err = CoreError::classify("conflict: container is marked for removal");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_message_keeps_raw_text() {
        let err = CoreError::timeout(1500, "stop container abc");
        assert_eq!(err.message(), "stop container abc");
        assert_eq!(err.to_string(), "tempo esgotado após 1500ms: stop container abc");
    }

    #[test]
    fn test_serialized_form_carries_kind() {
        let err = CoreError::not_found("pod web-0");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["message"], "pod web-0");
    }
}
