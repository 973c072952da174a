//! Configuração do núcleo (arquivo TOML)
//!
//! Exemplo mínimo:
//!
//! ```toml
//! [cache]
//! ttl_secs = 10
//!
//! [[engines]]
//! id = "local"
//! endpoint = "tcp://127.0.0.1:2375"
//!
//! [[clusters]]
//! id = "prod"
//! kubeconfig = "~/.kube/config"
//! namespace = "default"
//! ```

use crate::error::{CoreError, CoreResult};
use crate::model::{BackendKind, BackendRegistration};
use crate::registry::validate_backend_id;
use crate::retry::CreateRetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parâmetros de conexão de um backend. Opacos para o núcleo, usados
/// apenas na construção do adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionParams {
    Engine(EngineConnection),
    Cluster(ClusterConnection),
}

impl ConnectionParams {
    pub fn backend_kind(&self) -> BackendKind {
        match self {
            ConnectionParams::Engine(_) => BackendKind::Engine,
            ConnectionParams::Cluster(_) => BackendKind::Cluster,
        }
    }
}

/// Arquivos PEM para TLS
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsFiles {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

/// Conexão com o engine de containers (Docker Engine API)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConnection {
    /// `tcp://host:porta`, `http://…` ou `https://…`
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Versão da API fixada no prefixo das rotas (ex.: "1.43")
    pub api_version: Option<String>,
    pub tls: Option<TlsFiles>,
}

impl Default for EngineConnection {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:2375".to_string(),
            timeout_secs: 60,
            api_version: None,
            tls: None,
        }
    }
}

/// Conexão com um cluster Kubernetes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConnection {
    pub server: Option<String>,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub kubeconfig: Option<PathBuf>,
    /// Contexto do kubeconfig; vazio usa o `current-context`
    pub context: Option<String>,
    pub in_cluster: bool,
    pub insecure_skip_verify: bool,
    /// Namespace padrão; ausente usa o do kubeconfig ou `default`
    pub namespace: Option<String>,
    pub timeout_secs: u64,
    /// Tamanho de página das listagens (`limit`/`continue`)
    pub page_size: u32,
}

impl Default for ClusterConnection {
    fn default() -> Self {
        Self {
            server: None,
            token: None,
            token_file: None,
            ca_cert: None,
            kubeconfig: None,
            context: None,
            in_cluster: false,
            insecure_skip_verify: false,
            namespace: None,
            timeout_secs: 30,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Se definido, os logs são anexados a este arquivo em vez do stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub action_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub backoff_cap_ms: u64,
    pub create_retry: CreateRetryPolicy,
    /// Idade máxima de um estado conhecido para que ele possa rejeitar uma ação
    pub state_staleness_secs: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            action_timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_factor: 2,
            backoff_cap_ms: 5_000,
            create_retry: CreateRetryPolicy::Recheck,
            state_staleness_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    pub max_parallelism: usize,
    pub list_timeout_secs: u64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            max_parallelism: 8,
            list_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    #[default]
    Sqlite,
    Jsonl,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub sink: AuditSinkKind,
    /// Caminho do banco/arquivo; vazio usa o diretório de dados do usuário
    pub path: Option<PathBuf>,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Sqlite,
            path: None,
            queue_capacity: 1024,
            batch_size: 64,
            retry_base_ms: 200,
            retry_cap_ms: 5_000,
        }
    }
}

impl AuditSettings {
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let file = match self.sink {
            AuditSinkKind::Jsonl => "audit.jsonl",
            _ => "audit.db",
        };
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nauta")
            .join(file)
    }
}

/// Seção `[[engines]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    pub id: String,
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(flatten)]
    pub connection: EngineConnection,
}

/// Seção `[[clusters]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub id: String,
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(flatten)]
    pub connection: ClusterConnection,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub logging: LoggingConfig,
    pub dispatcher: DispatcherSettings,
    pub aggregator: AggregatorSettings,
    pub cache: CacheSettings,
    pub audit: AuditSettings,
    pub engines: Vec<EngineSection>,
    pub clusters: Vec<ClusterSection>,
}

/// Origem da configuração carregada por `CoreConfig::load_or_default`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Defaults(PathBuf),
}

impl ConfigOrigin {
    pub fn is_default(&self) -> bool {
        matches!(self, ConfigOrigin::Defaults(_))
    }

    pub fn path(&self) -> &Path {
        match self {
            ConfigOrigin::File(p) | ConfigOrigin::Defaults(p) => p,
        }
    }
}

impl CoreConfig {
    /// Caminho padrão: `<config_dir>/nauta/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nauta")
            .join("config.toml")
    }

    pub fn from_toml(text: &str) -> CoreResult<Self> {
        let config: CoreConfig = toml::from_str(text)
            .map_err(|e| CoreError::validation(format!("configuração inválida: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            CoreError::validation(format!(
                "falha ao ler configuração '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&text)
    }

    /// Carrega o arquivo se existir; caso contrário usa os padrões.
    /// O aviso de arquivo ausente fica com o chamador, após iniciar o logging.
    pub fn load_or_default(path: Option<&Path>) -> CoreResult<(Self, ConfigOrigin)> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);
        if path.exists() {
            let config = Self::load(&path)?;
            Ok((config, ConfigOrigin::File(path)))
        } else {
            Ok((Self::default(), ConfigOrigin::Defaults(path)))
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        let engines = self
            .engines
            .iter()
            .map(|e| (&e.id, e.display_name.as_ref()));
        let clusters = self
            .clusters
            .iter()
            .map(|c| (&c.id, c.display_name.as_ref()));

        for (id, name) in engines.chain(clusters) {
            validate_backend_id(id)?;
            if !ids.insert(id.as_str()) {
                return Err(CoreError::validation(format!("backend '{id}' duplicado")));
            }
            let name = name.unwrap_or(id);
            if !names.insert(name.as_str()) {
                return Err(CoreError::validation(format!(
                    "nome de backend '{name}' duplicado"
                )));
            }
        }

        for engine in &self.engines {
            if engine.connection.endpoint.trim().is_empty() {
                return Err(CoreError::validation(format!(
                    "engine '{}' sem endpoint",
                    engine.id
                )));
            }
        }

        if self.aggregator.max_parallelism == 0 {
            return Err(CoreError::validation("aggregator.max_parallelism deve ser > 0"));
        }
        if self.audit.queue_capacity == 0 || self.audit.batch_size == 0 {
            return Err(CoreError::validation(
                "audit.queue_capacity e audit.batch_size devem ser > 0",
            ));
        }

        Ok(())
    }

    /// Converte as seções de backends em registros para o `BackendRegistry`.
    pub fn registrations(&self) -> Vec<BackendRegistration> {
        let engines = self.engines.iter().map(|e| {
            let mut reg = BackendRegistration::new(
                e.id.clone(),
                e.display_name.clone().unwrap_or_else(|| e.id.clone()),
                ConnectionParams::Engine(e.connection.clone()),
            );
            reg.active = e.active;
            reg
        });
        let clusters = self.clusters.iter().map(|c| {
            let mut reg = BackendRegistration::new(
                c.id.clone(),
                c.display_name.clone().unwrap_or_else(|| c.id.clone()),
                ConnectionParams::Cluster(c.connection.clone()),
            );
            reg.active = c.active;
            reg
        });
        engines.chain(clusters).collect()
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatcher.action_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}
