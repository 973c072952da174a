//! Adapters de backend: traduzem o contrato do núcleo para a API nativa
//! de cada orquestrador.

pub mod cluster;
pub mod engine;
pub mod sim;

pub use cluster::ClusterAdapter;
pub use engine::EngineAdapter;
pub use sim::{SimAdapter, SimAdapterFactory};

use crate::error::{CoreError, CoreResult};
use crate::model::{Action, ActionParams, BackendKind, LogOptions, ResourceKind, ScopeFilter};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Stream preguiçoso de objetos brutos do backend
pub type RawStream = BoxStream<'static, CoreResult<Value>>;

/// Resultado bruto de uma ação
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// Id atribuído pelo backend (ex.: id do container criado)
    pub id: Option<String>,
    pub raw: Option<Value>,
}

impl ActionOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            raw: None,
        }
    }
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn backend_kind(&self) -> BackendKind;

    fn supports(&self, kind: ResourceKind) -> bool {
        kind.backend_kind() == self.backend_kind()
    }

    /// Namespace usado quando o chamador não informa um
    fn default_namespace(&self) -> Option<String> {
        None
    }

    /// A requisição só é feita quando o stream é consumido.
    fn list_resources(&self, kind: ResourceKind, scope: &ScopeFilter) -> RawStream;

    async fn perform_action(
        &self,
        kind: ResourceKind,
        id: &str,
        action: Action,
        params: &ActionParams,
    ) -> CoreResult<ActionOutcome>;

    /// Lê um objeto. `Ok(None)` quando ele não existe.
    async fn describe(
        &self,
        kind: ResourceKind,
        id: &str,
        namespace: Option<&str>,
    ) -> CoreResult<Option<Value>>;

    /// Texto do log de um container (engine) ou pod (cluster)
    async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        namespace: Option<&str>,
        options: &LogOptions,
    ) -> CoreResult<String>;

    /// Versão e contagens do backend, no formato bruto.
    /// Engine: `{"info": …, "version": …}`.
    /// Cluster: `{"version": …, "nodes": […], "namespaces": […], "namespace": "…"}`.
    async fn system_info(&self) -> CoreResult<Value>;

    /// Nós do cluster, no formato bruto
    async fn list_nodes(&self) -> CoreResult<Vec<Value>> {
        Err(CoreError::validation(format!(
            "backend {} não possui nós",
            self.backend_kind()
        )))
    }

    async fn health_check(&self) -> bool;
}

/// Só containers (engine) e pods (cluster) têm log
pub(crate) fn check_logs_kind(backend: BackendKind, kind: ResourceKind) -> CoreResult<()> {
    match (backend, kind) {
        (BackendKind::Engine, ResourceKind::Container) | (BackendKind::Cluster, ResourceKind::Pod) => {
            Ok(())
        }
        (backend, kind) if kind.backend_kind() != backend => Err(unsupported_kind(backend, kind)),
        (_, kind) => Err(CoreError::validation(format!("{kind} não possui logs"))),
    }
}

pub(crate) fn unsupported_kind(backend: BackendKind, kind: ResourceKind) -> CoreError {
    CoreError::validation(format!("backend {backend} não suporta recursos do tipo {kind}"))
}

pub(crate) fn unsupported_action(kind: ResourceKind, action: Action) -> CoreError {
    CoreError::validation(format!("ação '{action}' não se aplica a {kind}"))
}

/// Converte um status HTTP de erro na categoria do núcleo.
pub(crate) fn error_for_status(status: StatusCode, context: &str, body: &str) -> CoreError {
    let detail = extract_message(body);
    let message = if detail.is_empty() {
        format!("{context}: HTTP {}", status.as_u16())
    } else {
        format!("{context}: {detail}")
    };
    match status.as_u16() {
        401 | 403 => CoreError::permission(message),
        404 => CoreError::not_found(message),
        400 | 409 | 422 => CoreError::validation(message),
        408 | 504 => CoreError::timeout(0, message),
        // Demais 5xx são falhas transitórias do backend
        500..=599 => CoreError::connection(message),
        _ => CoreError::classify(message),
    }
}

/// Ambos os backends devolvem `{"message": "..."}` no corpo de erro.
fn extract_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Converte uma falha de transporte do `reqwest`.
pub(crate) fn transport_error(err: reqwest::Error, context: &str, timeout: Duration) -> CoreError {
    if err.is_timeout() {
        return CoreError::timeout(timeout.as_millis() as u64, format!("{context}: {err}"));
    }
    if err.is_connect() {
        return CoreError::connection(format!("{context}: {err}"));
    }
    CoreError::classify(format!("{context}: {err}"))
}

/// Lê a resposta como JSON, convertendo status de erro.
pub(crate) async fn read_json(
    response: reqwest::Response,
    context: &str,
    timeout: Duration,
) -> CoreResult<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(e, context, timeout))?;
    if !status.is_success() {
        return Err(error_for_status(status, context, &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body)
        .map_err(|e| CoreError::validation(format!("{context}: resposta inválida: {e}")))
}

/// Corpo bruto da resposta, convertendo status de erro.
pub(crate) async fn read_bytes(
    response: reqwest::Response,
    context: &str,
    timeout: Duration,
) -> CoreResult<Vec<u8>> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(e, context, timeout))?;
    if !status.is_success() {
        return Err(error_for_status(status, context, &String::from_utf8_lossy(&body)));
    }
    Ok(body.to_vec())
}

/// Como `read_json`, mas 404 vira `None`.
pub(crate) async fn read_optional_json(
    response: reqwest::Response,
    context: &str,
    timeout: Duration,
) -> CoreResult<Option<Value>> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    read_json(response, context, timeout).await.map(Some)
}

/// Material TLS já carregado do disco
#[derive(Default)]
pub(crate) struct TlsMaterial {
    pub ca_pem: Option<Vec<u8>>,
    /// Certificado + chave do cliente no mesmo PEM
    pub identity_pem: Option<Vec<u8>>,
    pub insecure_skip_verify: bool,
}

pub(crate) fn build_client(timeout: Duration, tls: &TlsMaterial) -> CoreResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .pool_idle_timeout(Duration::from_secs(90));

    if let Some(ca) = &tls.ca_pem {
        let cert = reqwest::Certificate::from_pem(ca)
            .map_err(|e| CoreError::validation(format!("certificado de CA inválido: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }
    if let Some(pem) = &tls.identity_pem {
        let identity = reqwest::Identity::from_pem(pem)
            .map_err(|e| CoreError::validation(format!("identidade TLS inválida: {e}")))?;
        builder = builder.identity(identity);
    }
    if tls.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| CoreError::validation(format!("falha ao criar cliente HTTP: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (401, ErrorKind::Permission),
            (403, ErrorKind::Permission),
            (404, ErrorKind::NotFound),
            (409, ErrorKind::Validation),
            (422, ErrorKind::Validation),
            (504, ErrorKind::Timeout),
            (503, ErrorKind::Connection),
            (500, ErrorKind::Connection),
            (502, ErrorKind::Connection),
        ];
        for (code, kind) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(error_for_status(status, "ctx", "").kind(), kind, "HTTP {code}");
        }
    }

    #[test]
    fn test_logs_only_for_containers_and_pods() {
        assert!(check_logs_kind(BackendKind::Engine, ResourceKind::Container).is_ok());
        assert!(check_logs_kind(BackendKind::Cluster, ResourceKind::Pod).is_ok());
        for (backend, kind) in [
            (BackendKind::Engine, ResourceKind::Volume),
            (BackendKind::Engine, ResourceKind::Pod),
            (BackendKind::Cluster, ResourceKind::Deployment),
        ] {
            let err = check_logs_kind(backend, kind).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{backend} {kind}");
        }
    }

    #[test]
    fn test_backend_message_is_kept() {
        let err = error_for_status(
            StatusCode::CONFLICT,
            "remover container web",
            r#"{"message":"You cannot remove a running container"}"#,
        );
        assert_eq!(
            err.message(),
            "remover container web: You cannot remove a running container"
        );
    }
}
