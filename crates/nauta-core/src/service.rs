//! Fachada do núcleo: junta registro, consultas, ações, cache e auditoria.

use crate::aggregator::{AggregateResult, QueryAggregator};
use crate::audit::{self, AuditRecorder, AuditSink, AuditStats, RecorderConfig};
use crate::cache::{CacheStore, QueryCache};
use crate::config::CoreConfig;
use crate::dispatcher::{ActionRequest, DispatcherConfig, OperationDispatcher};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::StateTracker;
use crate::model::{
    BackendInfo, BackendRef, BackendRegistration, LogOptions, NodeInfo, OperationRecord, Resource,
    ResourceKind, ScopeFilter,
};
use crate::registry::{AdapterFactory, BackendHealth, BackendRegistry, DefaultAdapterFactory};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Monta um [`ResourceCore`] a partir da configuração.
/// Fábrica de adapters, store de cache e sink de auditoria podem ser trocados.
pub struct ResourceCoreBuilder {
    config: CoreConfig,
    factory: Option<Arc<dyn AdapterFactory>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl ResourceCoreBuilder {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            factory: None,
            cache_store: None,
            audit_sink: None,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Precisa de um runtime tokio ativo (o worker de auditoria é iniciado aqui).
    pub fn build(self) -> CoreResult<ResourceCore> {
        let config = self.config;
        config.validate()?;

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultAdapterFactory));
        let registry = Arc::new(BackendRegistry::new(factory));
        for registration in config.registrations() {
            registry.register(registration)?;
        }

        let dispatcher_config = DispatcherConfig::from_settings(&config.dispatcher);
        let tracker = Arc::new(StateTracker::new(dispatcher_config.state_staleness));

        let ttl = config.cache_ttl();
        let cache = Arc::new(match (config.cache.enabled && !ttl.is_zero(), self.cache_store) {
            (false, _) => QueryCache::disabled(),
            (true, Some(store)) => QueryCache::new(store, ttl),
            (true, None) => QueryCache::in_memory(ttl),
        });

        let sink = match self.audit_sink {
            Some(sink) => sink,
            None => audit::open_sink(&config.audit).map_err(|e| {
                CoreError::validation(format!("falha ao abrir sink de auditoria: {e}"))
            })?,
        };
        let audit = Arc::new(AuditRecorder::start(
            Arc::clone(&sink),
            RecorderConfig::from_settings(&config.audit),
        ));

        let list_timeout = Duration::from_secs(config.aggregator.list_timeout_secs.max(1));
        let aggregator = QueryAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            config.aggregator.max_parallelism,
            list_timeout,
        );
        let dispatcher =
            OperationDispatcher::new(Arc::clone(&registry), Arc::clone(&tracker), dispatcher_config)
                .with_cache(Arc::clone(&cache))
                .with_audit(Arc::clone(&audit));

        info!(
            backends = registry.len(),
            cache = cache.is_enabled(),
            audit = sink.name(),
            "núcleo iniciado"
        );

        Ok(ResourceCore {
            config,
            registry,
            aggregator,
            dispatcher,
            cache,
            audit,
            sink,
            list_timeout,
        })
    }
}

pub struct ResourceCore {
    config: CoreConfig,
    registry: Arc<BackendRegistry>,
    aggregator: QueryAggregator,
    dispatcher: OperationDispatcher,
    cache: Arc<QueryCache>,
    audit: Arc<AuditRecorder>,
    sink: Arc<dyn AuditSink>,
    list_timeout: Duration,
}

impl ResourceCore {
    pub fn builder(config: CoreConfig) -> ResourceCoreBuilder {
        ResourceCoreBuilder::new(config)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Lista recursos de todos os backends que hospedam `kind`.
    /// Nunca falha por inteiro; erros por backend vêm em `errors`.
    pub async fn list_resources(&self, kind: ResourceKind, scope: &ScopeFilter) -> AggregateResult {
        let epoch = self.cache.epoch();
        if let Some(hit) = self.cache.get(kind, scope).await {
            return hit;
        }
        let result = self.aggregator.list(kind, scope).await;
        self.cache.put(kind, scope, &result, epoch).await;
        result
    }

    pub async fn get_resource(
        &self,
        kind: ResourceKind,
        id: &str,
        backend_ref: &BackendRef,
    ) -> CoreResult<Resource> {
        self.aggregator.get(kind, id, backend_ref).await
    }

    /// Log de um container (engine) ou pod (cluster). Não passa pelo cache.
    pub async fn resource_logs(
        &self,
        kind: ResourceKind,
        id: &str,
        backend_ref: &BackendRef,
        options: &LogOptions,
    ) -> CoreResult<String> {
        self.aggregator.logs(kind, id, backend_ref, options).await
    }

    pub async fn backend_info(&self, backend_id: &str) -> CoreResult<BackendInfo> {
        self.aggregator.info(backend_id).await
    }

    pub async fn cluster_nodes(&self, backend_id: &str) -> CoreResult<Vec<NodeInfo>> {
        self.aggregator.nodes(backend_id).await
    }

    pub async fn perform_lifecycle_action(&self, request: ActionRequest) -> CoreResult<Resource> {
        self.dispatcher.dispatch(request).await
    }

    pub fn register_backend(&self, registration: BackendRegistration) -> CoreResult<String> {
        self.registry.register(registration)
    }

    pub async fn deregister_backend(&self, id: &str) -> CoreResult<BackendRegistration> {
        let removed = self.registry.deregister(id)?;
        self.invalidate_backend(&removed).await;
        Ok(removed)
    }

    pub async fn enable_backend(&self, id: &str) -> CoreResult<()> {
        self.registry.enable(id)?;
        self.invalidate_backend_id(id).await;
        Ok(())
    }

    pub async fn disable_backend(&self, id: &str) -> CoreResult<()> {
        self.registry.disable(id)?;
        self.invalidate_backend_id(id).await;
        Ok(())
    }

    async fn invalidate_backend_id(&self, id: &str) {
        if let Some(registration) = self.registry.get(id) {
            self.invalidate_backend(&registration).await;
        }
    }

    /// Consultas agregadas passam a incluir ou excluir este backend
    async fn invalidate_backend(&self, registration: &BackendRegistration) {
        for kind in ResourceKind::ALL {
            if kind.backend_kind() == registration.kind {
                self.cache.invalidate(&registration.id, kind).await;
            }
        }
    }

    pub fn backends(&self) -> Vec<BackendRegistration> {
        self.registry.list()
    }

    /// Sonda os backends ativos e devolve o estado de cada um
    pub async fn health_status(&self) -> BTreeMap<String, BackendHealth> {
        self.registry.refresh_health(self.list_timeout).await
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.audit.stats()
    }

    /// Últimas operações gravadas, depois de esvaziar a fila
    pub async fn recent_operations(&self, limit: usize) -> CoreResult<Vec<OperationRecord>> {
        self.audit.flush().await;
        self.sink
            .recent(limit)
            .await
            .map_err(|e| CoreError::classify(format!("falha ao ler auditoria: {e}")))
    }

    pub async fn shutdown(&self) {
        self.audit.shutdown().await;
    }
}
