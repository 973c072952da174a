//! Registro de hosts de engine e clusters

use crate::adapter::{BackendAdapter, ClusterAdapter, EngineAdapter};
use crate::config::ConnectionParams;
use crate::error::{CoreError, CoreResult};
use crate::model::{BackendKind, BackendRegistration};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Constrói o adapter de um backend a partir da sua conexão.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, registration: &BackendRegistration) -> CoreResult<Arc<dyn BackendAdapter>>;
}

/// Fábrica real: Docker Engine API e API do Kubernetes via HTTP
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn build(&self, registration: &BackendRegistration) -> CoreResult<Arc<dyn BackendAdapter>> {
        match &registration.connection {
            ConnectionParams::Engine(conn) => Ok(Arc::new(EngineAdapter::new(conn)?)),
            ConnectionParams::Cluster(conn) => Ok(Arc::new(ClusterAdapter::new(conn)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub reachable: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Ids de backend compõem chaves de cache e de lock: vazio e `|` são recusados.
pub fn validate_backend_id(id: &str) -> CoreResult<()> {
    if id.trim().is_empty() {
        return Err(CoreError::validation("backend com id vazio"));
    }
    if id.contains('|') {
        return Err(CoreError::validation(format!(
            "id de backend '{id}' inválido: '|' não é permitido"
        )));
    }
    Ok(())
}

struct Entry {
    registration: BackendRegistration,
    adapter: Option<Arc<dyn BackendAdapter>>,
    /// Reconstruir o adapter antes do próximo uso
    stale: bool,
}

/// Tabela em memória de backends. O lock protege apenas a estrutura;
/// nenhuma chamada de rede acontece com ele adquirido.
pub struct BackendRegistry {
    entries: RwLock<BTreeMap<String, Entry>>,
    factory: Arc<dyn AdapterFactory>,
}

impl BackendRegistry {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            factory,
        }
    }

    pub fn register(&self, registration: BackendRegistration) -> CoreResult<String> {
        let id = registration.id.trim().to_string();
        validate_backend_id(&id)?;
        if registration.display_name.trim().is_empty() {
            return Err(CoreError::validation(format!("backend '{id}' sem nome")));
        }
        if registration.kind != registration.connection.backend_kind() {
            return Err(CoreError::validation(format!(
                "backend '{id}': tipo {} não corresponde à conexão {}",
                registration.kind,
                registration.connection.backend_kind()
            )));
        }

        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(CoreError::validation(format!("backend '{id}' já registrado")));
        }
        if entries
            .values()
            .any(|e| e.registration.display_name == registration.display_name)
        {
            return Err(CoreError::validation(format!(
                "já existe backend com o nome '{}'",
                registration.display_name
            )));
        }

        info!(backend = %id, kind = %registration.kind, "backend registrado");
        entries.insert(
            id.clone(),
            Entry {
                registration: BackendRegistration { id: id.clone(), ..registration },
                adapter: None,
                stale: false,
            },
        );
        Ok(id)
    }

    pub fn deregister(&self, id: &str) -> CoreResult<BackendRegistration> {
        let removed = self.entries.write().remove(id);
        match removed {
            Some(entry) => {
                info!(backend = %id, "backend removido");
                Ok(entry.registration)
            }
            None => Err(not_registered(id)),
        }
    }

    pub fn enable(&self, id: &str) -> CoreResult<()> {
        self.set_active(id, true)
    }

    pub fn disable(&self, id: &str) -> CoreResult<()> {
        self.set_active(id, false)
    }

    fn set_active(&self, id: &str, active: bool) -> CoreResult<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id).ok_or_else(|| not_registered(id))?;
        entry.registration.active = active;
        info!(backend = %id, active, "estado do backend alterado");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<BackendRegistration> {
        self.entries.read().get(id).map(|e| e.registration.clone())
    }

    pub fn list(&self) -> Vec<BackendRegistration> {
        self.entries
            .read()
            .values()
            .map(|e| e.registration.clone())
            .collect()
    }

    /// Backends ativos, opcionalmente filtrados por tipo
    pub fn active(&self, kind: Option<BackendKind>) -> Vec<BackendRegistration> {
        self.entries
            .read()
            .values()
            .filter(|e| e.registration.active)
            .filter(|e| kind.map_or(true, |k| e.registration.kind == k))
            .map(|e| e.registration.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Devolve o registro e o adapter de um backend ativo, construindo o
    /// adapter se ainda não existir ou se estiver marcado para reconstrução.
    pub fn resolve(&self, id: &str) -> CoreResult<(BackendRegistration, Arc<dyn BackendAdapter>)> {
        let registration = {
            let entries = self.entries.read();
            let entry = entries.get(id).ok_or_else(|| not_registered(id))?;
            if !entry.registration.active {
                return Err(CoreError::not_found(format!("backend '{id}' está desativado")));
            }
            if let (Some(adapter), false) = (&entry.adapter, entry.stale) {
                return Ok((entry.registration.clone(), Arc::clone(adapter)));
            }
            entry.registration.clone()
        };

        let built = self.factory.build(&registration)?;

        let mut entries = self.entries.write();
        let entry = entries.get_mut(id).ok_or_else(|| not_registered(id))?;
        match (&entry.adapter, entry.stale) {
            // Outra chamada já reconstruiu enquanto esta construía
            (Some(existing), false) => Ok((entry.registration.clone(), Arc::clone(existing))),
            _ => {
                entry.adapter = Some(Arc::clone(&built));
                entry.stale = false;
                Ok((entry.registration.clone(), built))
            }
        }
    }

    /// Marca o adapter para reconstrução antes do próximo uso
    pub fn mark_stale(&self, id: &str) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.stale = true;
        }
    }

    pub fn record_health(&self, id: &str, reachable: bool) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.registration.last_health_check = Some(Utc::now());
            entry.registration.reachable = Some(reachable);
            if !reachable {
                entry.stale = true;
            }
        }
    }

    /// Estado de saúde registrado, sem sondar os backends
    pub fn health_snapshot(&self) -> BTreeMap<String, BackendHealth> {
        self.entries
            .read()
            .values()
            .map(|e| {
                (
                    e.registration.id.clone(),
                    BackendHealth {
                        reachable: e.registration.reachable.unwrap_or(false),
                        last_checked: e.registration.last_health_check,
                    },
                )
            })
            .collect()
    }

    /// Sonda todos os backends ativos em paralelo e registra o resultado.
    pub async fn refresh_health(&self, timeout: Duration) -> BTreeMap<String, BackendHealth> {
        let probes = self.active(None).into_iter().map(|registration| async move {
            let reachable = match self.resolve(&registration.id) {
                Ok((_, adapter)) => tokio::time::timeout(timeout, adapter.health_check())
                    .await
                    .unwrap_or(false),
                Err(e) => {
                    warn!(backend = %registration.id, error = %e, "falha ao construir adapter");
                    false
                }
            };
            if !reachable {
                warn!(backend = %registration.id, "backend inalcançável");
            }
            self.record_health(&registration.id, reachable);
            registration.id
        });
        join_all(probes).await;

        self.health_snapshot()
            .into_iter()
            .filter(|(id, _)| self.get(id).map(|r| r.active).unwrap_or(false))
            .collect()
    }
}

fn not_registered(id: &str) -> CoreError {
    CoreError::not_found(format!("backend '{id}' não registrado"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{SimAdapter, SimAdapterFactory};
    use crate::config::{ClusterConnection, EngineConnection};
    use crate::error::ErrorKind;

    fn engine(id: &str, name: &str) -> BackendRegistration {
        BackendRegistration::new(id, name, ConnectionParams::Engine(EngineConnection::default()))
    }

    fn cluster(id: &str) -> BackendRegistration {
        BackendRegistration::new(id, id, ConnectionParams::Cluster(ClusterConnection::default()))
    }

    fn registry() -> (Arc<SimAdapterFactory>, BackendRegistry) {
        let factory = Arc::new(SimAdapterFactory::new());
        let registry = BackendRegistry::new(factory.clone());
        (factory, registry)
    }

    #[test]
    fn test_duplicate_name_rejected_and_table_unchanged() {
        let (_, registry) = registry();
        registry.register(engine("a", "Docker A")).unwrap();
        let before = registry.list();

        let err = registry.register(engine("b", "Docker A")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = registry.register(engine("a", "Outro")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(registry.list(), before);
    }

    #[test]
    fn test_separator_in_id_rejected() {
        let (_, registry) = registry();
        let err = registry.register(engine("a|b", "A")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(registry.register(engine("  ", "B")).is_err());
        assert!(registry.is_empty());

        // "all" é um id comum: não colide com as consultas agregadas
        registry.register(engine("all", "Todos")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_mismatched_kind_rejected() {
        let (_, registry) = registry();
        let mut reg = engine("a", "A");
        reg.kind = BackendKind::Cluster;
        assert!(registry.register(reg).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_enable_disable_and_resolve() {
        let (factory, registry) = registry();
        registry.register(engine("a", "A")).unwrap();
        registry.register(cluster("k")).unwrap();

        assert_eq!(registry.active(Some(BackendKind::Cluster)).len(), 1);
        registry.disable("k").unwrap();
        assert!(registry.active(Some(BackendKind::Cluster)).is_empty());
        assert_eq!(registry.resolve("k").err().unwrap().kind(), ErrorKind::NotFound);

        registry.enable("k").unwrap();
        let (reg, adapter) = registry.resolve("k").unwrap();
        assert_eq!(reg.id, "k");
        assert_eq!(adapter.backend_kind(), BackendKind::Cluster);

        // Adapter fica em cache
        registry.resolve("k").unwrap();
        assert_eq!(factory.builds("k"), 1);
    }

    #[test]
    fn test_unknown_backend() {
        let (_, registry) = registry();
        assert_eq!(registry.deregister("x").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(registry.enable("x").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(registry.resolve("x").is_err());
    }

    #[tokio::test]
    async fn test_failed_health_forces_rebuild() {
        let sim = SimAdapter::engine();
        let factory = Arc::new(SimAdapterFactory::new().with_adapter("a", sim.clone()));
        let registry = BackendRegistry::new(factory.clone());
        registry.register(engine("a", "A")).unwrap();

        let health = registry.refresh_health(Duration::from_secs(1)).await;
        assert!(health["a"].reachable);
        assert!(health["a"].last_checked.is_some());
        assert_eq!(factory.builds("a"), 1);

        sim.set_reachable(false);
        let health = registry.refresh_health(Duration::from_secs(1)).await;
        assert!(!health["a"].reachable);

        registry.resolve("a").unwrap();
        assert_eq!(factory.builds("a"), 2);
    }
}
