//! Consulta agregada: distribui a listagem por todos os backends ativos

use crate::error::{CoreError, CoreResult};
use crate::lifecycle::StateTracker;
use crate::model::{
    BackendInfo, BackendKind, BackendRef, BackendRegistration, LogOptions, NodeInfo, Resource,
    ResourceKind, ScopeFilter,
};
use crate::normalizer::{normalize, normalize_info, normalize_node};
use crate::registry::BackendRegistry;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// União dos recursos encontrados e erros por backend.
/// Uma falha de backend nunca derruba a consulta inteira.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub resources: Vec<Resource>,
    pub errors: BTreeMap<String, CoreError>,
}

impl AggregateResult {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct QueryAggregator {
    registry: Arc<BackendRegistry>,
    tracker: Arc<StateTracker>,
    max_parallelism: usize,
    list_timeout: Duration,
}

impl QueryAggregator {
    pub fn new(
        registry: Arc<BackendRegistry>,
        tracker: Arc<StateTracker>,
        max_parallelism: usize,
        list_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            max_parallelism: max_parallelism.max(1),
            list_timeout,
        }
    }

    pub async fn list(&self, kind: ResourceKind, scope: &ScopeFilter) -> AggregateResult {
        let mut result = AggregateResult::default();
        let mut targets = self.registry.active(Some(kind.backend_kind()));

        if let Some(wanted) = &scope.backend_id {
            targets.retain(|r| &r.id == wanted);
            if targets.is_empty() {
                let error = match self.registry.get(wanted) {
                    Some(reg) if !reg.active => {
                        CoreError::not_found(format!("backend '{wanted}' está desativado"))
                    }
                    Some(reg) => CoreError::validation(format!(
                        "backend '{wanted}' ({}) não hospeda {kind}",
                        reg.kind
                    )),
                    None => CoreError::not_found(format!("backend '{wanted}' não registrado")),
                };
                result.errors.insert(wanted.clone(), error);
                return result;
            }
        }

        let mut outcomes: Vec<(String, CoreResult<Vec<Resource>>)> = stream::iter(targets)
            .map(|registration| self.list_backend(registration, kind, scope))
            .buffer_unordered(self.max_parallelism)
            .collect()
            .await;
        // Agrupa por backend em ordem estável; dentro de cada grupo vale a ordem nativa
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        for (backend_id, outcome) in outcomes {
            match outcome {
                Ok(resources) => result.resources.extend(resources),
                Err(e) => {
                    result.errors.insert(backend_id, e);
                }
            }
        }
        result
    }

    async fn list_backend(
        &self,
        registration: BackendRegistration,
        kind: ResourceKind,
        scope: &ScopeFilter,
    ) -> (String, CoreResult<Vec<Resource>>) {
        let id = registration.id.clone();
        let (_, adapter) = match self.registry.resolve(&id) {
            Ok(resolved) => resolved,
            Err(e) => return (id, Err(e)),
        };

        let backend_ref = match (kind.is_namespaced(), &scope.namespace) {
            (true, Some(ns)) if !scope.all_namespaces => BackendRef::namespaced(id.clone(), ns),
            _ => BackendRef::new(id.clone()),
        };
        let listing = adapter
            .list_resources(kind, scope)
            .map_ok(|raw| normalize(registration.kind, kind, &raw, &backend_ref))
            .try_collect::<Vec<_>>();

        let outcome = match tokio::time::timeout(self.list_timeout, listing).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::timeout(
                self.list_timeout.as_millis() as u64,
                format!("listar {kind} em '{id}'"),
            )),
        };

        match &outcome {
            Ok(resources) => {
                debug!(backend = %id, %kind, count = resources.len(), "listagem concluída");
                for resource in resources {
                    self.tracker.observe(resource);
                }
            }
            Err(e) => {
                warn!(backend = %id, %kind, error = %e, "listagem falhou");
                if e.is_transient() {
                    self.registry.mark_stale(&id);
                }
            }
        }
        (id, outcome)
    }

    /// Leitura de um único recurso
    pub async fn get(
        &self,
        kind: ResourceKind,
        id: &str,
        backend_ref: &BackendRef,
    ) -> CoreResult<Resource> {
        let (registration, adapter) = self.registry.resolve(&backend_ref.backend_id)?;
        if registration.kind != kind.backend_kind() {
            return Err(CoreError::validation(format!(
                "backend '{}' ({}) não hospeda {kind}",
                registration.id, registration.kind
            )));
        }

        let namespace = if kind.is_namespaced() {
            backend_ref.namespace.clone().or_else(|| adapter.default_namespace())
        } else {
            None
        };
        let lookup_ref = BackendRef {
            backend_id: registration.id.clone(),
            namespace: namespace.clone(),
        };

        let raw = tokio::time::timeout(
            self.list_timeout,
            adapter.describe(kind, id, namespace.as_deref()),
        )
        .await
        .map_err(|_| {
            CoreError::timeout(
                self.list_timeout.as_millis() as u64,
                format!("consultar {kind} '{id}'"),
            )
        })??;

        match raw {
            Some(raw) => {
                let resource = normalize(registration.kind, kind, &raw, &lookup_ref);
                self.tracker.observe(&resource);
                Ok(resource)
            }
            None => Err(CoreError::not_found(format!("{kind} '{id}' em {lookup_ref}"))),
        }
    }

    /// Log de um container ou pod
    pub async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        backend_ref: &BackendRef,
        options: &LogOptions,
    ) -> CoreResult<String> {
        let (registration, adapter) = self.registry.resolve(&backend_ref.backend_id)?;
        let namespace = if kind.is_namespaced() {
            backend_ref.namespace.clone().or_else(|| adapter.default_namespace())
        } else {
            None
        };
        self.bounded(
            &registration.id,
            format!("logs de {kind} '{id}'"),
            adapter.logs(kind, id, namespace.as_deref(), options),
        )
        .await
    }

    /// Versão, plataforma e contagens de um backend
    pub async fn info(&self, backend_id: &str) -> CoreResult<BackendInfo> {
        let (registration, adapter) = self.registry.resolve(backend_id)?;
        let raw = self
            .bounded(
                &registration.id,
                format!("informações de '{backend_id}'"),
                adapter.system_info(),
            )
            .await?;
        Ok(normalize_info(registration.kind, &registration.id, &raw))
    }

    /// Nós de um cluster
    pub async fn nodes(&self, backend_id: &str) -> CoreResult<Vec<NodeInfo>> {
        let (registration, adapter) = self.registry.resolve(backend_id)?;
        if registration.kind != BackendKind::Cluster {
            return Err(CoreError::validation(format!(
                "backend '{backend_id}' ({}) não possui nós",
                registration.kind
            )));
        }
        let raw = self
            .bounded(&registration.id, format!("listar nós de '{backend_id}'"), adapter.list_nodes())
            .await?;
        Ok(raw.iter().map(normalize_node).collect())
    }

    /// Aplica o timeout de consulta; falha transitória marca o adapter para reconstrução
    async fn bounded<T>(
        &self,
        backend_id: &str,
        context: String,
        call: impl Future<Output = CoreResult<T>>,
    ) -> CoreResult<T> {
        let outcome = match tokio::time::timeout(self.list_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::timeout(self.list_timeout.as_millis() as u64, context)),
        };
        if let Err(e) = &outcome {
            debug!(backend = %backend_id, error = %e, "consulta ao backend falhou");
            if e.is_transient() {
                self.registry.mark_stale(backend_id);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::sim::SimObject;
    use crate::adapter::{BackendAdapter, SimAdapter, SimAdapterFactory};
    use crate::config::{ConnectionParams, EngineConnection};
    use crate::error::ErrorKind;
    use crate::model::ResourceStatus;

    fn setup(sims: &[(&str, SimAdapter)]) -> QueryAggregator {
        let mut factory = SimAdapterFactory::new();
        for (id, sim) in sims {
            factory = factory.with_adapter(id, sim.clone());
        }
        let registry = Arc::new(BackendRegistry::new(Arc::new(factory)));
        for (id, sim) in sims {
            let conn = match sim.backend_kind() {
                BackendKind::Engine => ConnectionParams::Engine(EngineConnection::default()),
                BackendKind::Cluster => ConnectionParams::Cluster(Default::default()),
            };
            registry
                .register(BackendRegistration::new(*id, *id, conn))
                .unwrap();
        }
        QueryAggregator::new(
            registry,
            Arc::new(StateTracker::new(Duration::from_secs(10))),
            4,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_explicit_backend_filter() {
        let aggregator = setup(&[
            ("a", SimAdapter::engine().with_container("c1", "running")),
            ("b", SimAdapter::engine().with_container("c2", "running")),
        ]);
        let result = aggregator
            .list(ResourceKind::Container, &ScopeFilter::for_backend("b"))
            .await;
        assert_eq!(result.resources.len(), 1);
        assert_eq!(result.resources[0].backend_ref.backend_id, "b");

        let missing = aggregator
            .list(ResourceKind::Container, &ScopeFilter::for_backend("zz"))
            .await;
        assert_eq!(missing.errors["zz"].kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_only_matching_backend_kind_is_queried() {
        let engine = SimAdapter::engine().with_container("c1", "running");
        let cluster = SimAdapter::cluster().with_pod("default", "p1", "Pending");
        let aggregator = setup(&[("a", engine.clone()), ("k", cluster.clone())]);

        let pods = aggregator.list(ResourceKind::Pod, &ScopeFilter::default()).await;
        assert_eq!(pods.resources.len(), 1);
        assert_eq!(pods.resources[0].status, ResourceStatus::Pending);
        assert_eq!(engine.list_calls(), 0);
        assert_eq!(cluster.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_pod_logs_use_default_namespace() {
        let cluster = SimAdapter::cluster().with(
            SimObject::new(ResourceKind::Pod, "web", "Running").with_log_lines(["pronto"]),
        );
        let aggregator = setup(&[("k", cluster)]);
        let options = LogOptions {
            timestamps: false,
            ..LogOptions::default()
        };
        let text = aggregator
            .logs(ResourceKind::Pod, "web", &BackendRef::new("k"), &options)
            .await
            .unwrap();
        assert_eq!(text, "pronto\n");

        let err = aggregator
            .logs(ResourceKind::Pod, "web", &BackendRef::namespaced("k", "apps"), &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_info_and_nodes() {
        let engine = SimAdapter::engine()
            .with_container("c1", "running")
            .with_container("c2", "exited");
        let cluster = SimAdapter::cluster()
            .with_node("cp-1", true, &["control-plane"])
            .with_node("w-1", false, &[]);
        let aggregator = setup(&[("a", engine), ("k", cluster)]);

        let info = aggregator.info("a").await.unwrap();
        assert_eq!(info.kind, BackendKind::Engine);
        assert_eq!(info.counts["containers_running"], 1);
        assert_eq!(info.counts["containers_stopped"], 1);

        let info = aggregator.info("k").await.unwrap();
        assert_eq!(info.counts["nodes"], 2);
        assert_eq!(info.counts["nodes_ready"], 1);

        let nodes = aggregator.nodes("k").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].roles, vec!["control-plane"]);
        assert!(!nodes[1].ready);

        let err = aggregator.nodes("a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_get_single_resource() {
        let aggregator = setup(&[("k", SimAdapter::cluster().with_pod("apps", "web", "Running"))]);
        let pod = aggregator
            .get(ResourceKind::Pod, "web", &BackendRef::namespaced("k", "apps"))
            .await
            .unwrap();
        assert_eq!(pod.status, ResourceStatus::Running);
        assert_eq!(pod.backend_ref, BackendRef::namespaced("k", "apps"));

        let err = aggregator
            .get(ResourceKind::Pod, "web", &BackendRef::new("k"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
