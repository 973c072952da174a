use crate::config::ConnectionParams;
use crate::error::{CoreError, CoreResult, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Tipo de backend: engine de containers ou cluster Kubernetes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Engine,
    Cluster,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Engine => write!(f, "engine"),
            BackendKind::Cluster => write!(f, "cluster"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Container,
    Image,
    Network,
    Volume,
    Pod,
    Deployment,
    Service,
    Namespace,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Container,
        ResourceKind::Image,
        ResourceKind::Network,
        ResourceKind::Volume,
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::Namespace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Container => "container",
            ResourceKind::Image => "image",
            ResourceKind::Network => "network",
            ResourceKind::Volume => "volume",
            ResourceKind::Pod => "pod",
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "service",
            ResourceKind::Namespace => "namespace",
        }
    }

    /// Tipo de backend que hospeda este tipo de recurso.
    pub fn backend_kind(&self) -> BackendKind {
        match self {
            ResourceKind::Container
            | ResourceKind::Image
            | ResourceKind::Network
            | ResourceKind::Volume => BackendKind::Engine,
            ResourceKind::Pod
            | ResourceKind::Deployment
            | ResourceKind::Service
            | ResourceKind::Namespace => BackendKind::Cluster,
        }
    }

    /// Recursos com escopo de namespace no cluster
    pub fn is_namespaced(&self) -> bool {
        matches!(
            self,
            ResourceKind::Pod | ResourceKind::Deployment | ResourceKind::Service
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let singular = lowered.strip_suffix('s').unwrap_or(&lowered);
        ResourceKind::ALL
            .iter()
            .find(|k| k.as_str() == lowered || k.as_str() == singular)
            .copied()
            .ok_or_else(|| CoreError::validation(format!("tipo de recurso desconhecido: '{s}'")))
    }
}

/// Status canônico. Cada tipo de recurso usa um subconjunto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Stopped,
    Removing,
    Removed,
    Dead,
    Pending,
    Succeeded,
    Failed,
    Progressing,
    Available,
    Active,
    Terminating,
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceStatus::Created => "created",
            ResourceStatus::Running => "running",
            ResourceStatus::Paused => "paused",
            ResourceStatus::Restarting => "restarting",
            ResourceStatus::Stopped => "stopped",
            ResourceStatus::Removing => "removing",
            ResourceStatus::Removed => "removed",
            ResourceStatus::Dead => "dead",
            ResourceStatus::Pending => "pending",
            ResourceStatus::Succeeded => "succeeded",
            ResourceStatus::Failed => "failed",
            ResourceStatus::Progressing => "progressing",
            ResourceStatus::Available => "available",
            ResourceStatus::Active => "active",
            ResourceStatus::Terminating => "terminating",
            ResourceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Referência a um backend (host ou cluster) e, opcionalmente, a um namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendRef {
    pub backend_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl BackendRef {
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            namespace: None,
        }
    }

    pub fn namespaced(backend_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            namespace: Some(namespace.into()),
        }
    }
}

impl std::fmt::Display for BackendRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", self.backend_id, ns),
            None => f.write_str(&self.backend_id),
        }
    }
}

/// Entidade canônica. Produzida a cada consulta, nunca guardada como objeto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub status: ResourceStatus,
    pub labels: BTreeMap<String, String>,
    pub backend_ref: BackendRef,
    /// Segundos desde a época Unix (UTC)
    pub created_at: i64,
    pub size_bytes: u64,
    /// Campos extras já normalizados (imagem, réplicas, driver, uid…)
    pub attributes: BTreeMap<String, String>,
}

/// Filtro de escopo de uma listagem
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeFilter {
    pub backend_id: Option<String>,
    pub namespace: Option<String>,
    pub all_namespaces: bool,
    pub labels: BTreeMap<String, String>,
    /// Inclui containers parados (equivale a `all=true` no engine).
    /// Desligado por padrão, como `docker ps` e a flag `--all` da CLI.
    pub include_stopped: bool,
}

impl ScopeFilter {
    pub fn for_backend(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: Some(backend_id.into()),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Representação estável usada na chave do cache.
    /// O backend não entra aqui, ele já compõe a própria chave.
    pub fn fingerprint(&self) -> String {
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "ns={};all_ns={};labels={};stopped={}",
            self.namespace.as_deref().unwrap_or(""),
            self.all_namespaces,
            labels,
            self.include_stopped
        )
    }

    /// Seletor de labels no formato do Kubernetes (`k=v,k2=v2`)
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Verbo de ciclo de vida
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Delete,
    Scale,
}

impl Action {
    /// Repetir a ação é seguro sem checar se a tentativa anterior surtiu efeito.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Action::Create | Action::Scale)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Pause => "pause",
            Action::Unpause => "unpause",
            Action::Delete => "delete",
            Action::Scale => "scale",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" | "pull" => Ok(Action::Create),
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            "pause" => Ok(Action::Pause),
            "unpause" => Ok(Action::Unpause),
            "delete" | "remove" | "rm" => Ok(Action::Delete),
            "scale" => Ok(Action::Scale),
            other => Err(CoreError::validation(format!("ação desconhecida: '{other}'"))),
        }
    }
}

/// Parâmetros de uma ação. `body` é repassado ao backend em criações.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionParams {
    pub namespace: Option<String>,
    pub replicas: Option<u32>,
    pub image: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub force: bool,
    /// Segundos de espera para parada graciosa (stop/restart)
    pub grace_period_secs: Option<u64>,
    pub body: Option<serde_json::Value>,
}

impl ActionParams {
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Alvo de uma operação
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub kind: ResourceKind,
    pub id: String,
    pub backend_ref: BackendRef,
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.kind, self.id, self.backend_ref)
    }
}

impl TargetRef {
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            backend_ref: self.backend_ref.clone(),
            kind: self.kind,
            id: self.id.clone(),
        }
    }
}

/// Identidade de um recurso: `(backend, kind, id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub backend_ref: BackendRef,
    pub kind: ResourceKind,
    pub id: String,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            backend_ref: self.backend_ref.clone(),
            kind: self.kind,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "pending"),
            OperationStatus::Success => write!(f, "success"),
            OperationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Registro auditável de uma operação mutável
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub operation_type: Action,
    pub target: TargetRef,
    pub status: OperationStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub initiator: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

impl OperationRecord {
    pub fn begin(operation_type: Action, target: TargetRef, initiator: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation_type,
            target,
            status: OperationStatus::Pending,
            error_kind: None,
            error_message: None,
            initiator: initiator.into(),
            requested_at: Utc::now(),
            completed_at: None,
            attempts: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != OperationStatus::Pending
    }

    /// Marca como concluída com sucesso
    pub fn mark_success(&mut self) -> CoreResult<()> {
        self.finalize(OperationStatus::Success)
    }

    /// Marca como falha, guardando a categoria e a mensagem do erro
    pub fn mark_failed(&mut self, error: &CoreError) -> CoreResult<()> {
        self.finalize(OperationStatus::Failed)?;
        self.error_kind = Some(error.kind());
        self.error_message = Some(error.message().to_string());
        Ok(())
    }

    fn finalize(&mut self, status: OperationStatus) -> CoreResult<()> {
        if self.is_terminal() {
            return Err(CoreError::validation(format!(
                "operação '{}' já finalizada como {}",
                self.id, self.status
            )));
        }
        self.status = status;
        // Garante completed_at > requested_at mesmo com relógio de baixa resolução
        let now = Utc::now();
        self.completed_at = Some(if now > self.requested_at {
            now
        } else {
            self.requested_at + chrono::Duration::microseconds(1)
        });
        Ok(())
    }
}

/// Opções de leitura de logs de um container ou pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// Últimas N linhas; `None` traz o log inteiro
    pub tail: Option<u32>,
    /// Só linhas dos últimos N segundos
    pub since_secs: Option<u64>,
    pub timestamps: bool,
    /// Container dentro do pod (pods com mais de um container)
    pub container: Option<String>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            tail: Some(100),
            since_secs: None,
            timestamps: true,
            container: None,
        }
    }
}

/// Resumo de um backend: versão, plataforma e contagens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub backend_id: String,
    pub kind: BackendKind,
    pub server_version: String,
    pub api_version: Option<String>,
    /// `os/arch`
    pub platform: Option<String>,
    /// Ex.: `containers_running`, `nodes_ready`, `namespaces_active`
    pub counts: BTreeMap<String, u64>,
    pub attributes: BTreeMap<String, String>,
}

/// Nó de um cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
    pub roles: Vec<String>,
    pub kubelet_version: String,
    pub internal_ip: Option<String>,
    pub os_image: Option<String>,
    pub kernel_version: Option<String>,
    pub container_runtime: Option<String>,
    pub architecture: Option<String>,
    /// Epoch em segundos
    pub created_at: i64,
    pub capacity: BTreeMap<String, String>,
    pub allocatable: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// `chave=valor:efeito`
    pub taints: Vec<String>,
}

/// Backend configurado (host de engine ou cluster)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRegistration {
    pub id: String,
    pub display_name: String,
    pub kind: BackendKind,
    pub connection: ConnectionParams,
    pub active: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub reachable: Option<bool>,
}

impl BackendRegistration {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        connection: ConnectionParams,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind: connection.backend_kind(),
            connection,
            active: true,
            last_health_check: None,
            reachable: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetRef {
        TargetRef {
            kind: ResourceKind::Container,
            id: "abc".to_string(),
            backend_ref: BackendRef::new("local"),
        }
    }

    #[test]
    fn test_record_lifecycle() {
        let mut record = OperationRecord::begin(Action::Stop, target(), "cli");
        assert_eq!(record.status, OperationStatus::Pending);
        assert!(record.completed_at.is_none());

        record.mark_success().unwrap();
        assert_eq!(record.status, OperationStatus::Success);
        assert!(record.completed_at.unwrap() > record.requested_at);
    }

    #[test]
    fn test_record_never_goes_backward() {
        let mut record = OperationRecord::begin(Action::Delete, target(), "cli");
        record
            .mark_failed(&CoreError::not_found("container abc"))
            .unwrap();
        assert_eq!(record.error_kind, Some(ErrorKind::NotFound));

        let err = record.mark_success().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(record.status, OperationStatus::Failed);
    }

    #[test]
    fn test_resource_kind_parse() {
        assert_eq!("pods".parse::<ResourceKind>().unwrap(), ResourceKind::Pod);
        assert_eq!("Container".parse::<ResourceKind>().unwrap(), ResourceKind::Container);
        assert!("node".parse::<ResourceKind>().is_err());
        assert_eq!(ResourceKind::Volume.backend_kind(), BackendKind::Engine);
        assert_eq!(ResourceKind::Service.backend_kind(), BackendKind::Cluster);
    }

    #[test]
    fn test_action_idempotency() {
        assert!(Action::Stop.is_idempotent());
        assert!(Action::Delete.is_idempotent());
        assert!(!Action::Create.is_idempotent());
        assert!(!Action::Scale.is_idempotent());
        assert_eq!("rm".parse::<Action>().unwrap(), Action::Delete);
    }

    #[test]
    fn test_scope_fingerprint_is_order_independent() {
        let a = ScopeFilter::default().with_label("app", "web").with_label("tier", "front");
        let b = ScopeFilter::default().with_label("tier", "front").with_label("app", "web");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.label_selector().unwrap(), "app=web,tier=front");
    }

    #[test]
    fn test_scope_defaults_hide_stopped_containers() {
        let scope = ScopeFilter::default();
        assert!(!scope.include_stopped);
        assert!(!scope.all_namespaces);

        let parsed: ScopeFilter = serde_json::from_str(r#"{"backend_id":"local"}"#).unwrap();
        assert!(!parsed.include_stopped);
        assert_ne!(
            parsed.fingerprint(),
            ScopeFilter { include_stopped: true, ..parsed.clone() }.fingerprint()
        );
    }
}
