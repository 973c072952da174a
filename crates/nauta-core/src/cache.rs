//! Cache de resultados de consulta com TTL

use crate::aggregator::AggregateResult;
use crate::model::{ResourceKind, ScopeFilter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Espaço das consultas que abrangem todos os backends
pub const ALL_BACKENDS: &str = "all";
/// Espaço das consultas de um único backend; ids de backend não contêm `|`
pub const BACKEND_SCOPE: &str = "backend:";

/// Armazenamento chave-valor com expiração
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    /// Remove todas as chaves com o prefixo; devolve quantas saíram
    async fn delete_prefix(&self, prefix: &str) -> usize;
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedValue {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CachedValue>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !e.is_expired());
        entries.insert(
            key.to_string(),
            CachedValue {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }
}

/// `all|kind|` ou `backend:<id>|kind|`
fn key_prefix(backend_id: Option<&str>, kind: ResourceKind) -> String {
    match backend_id {
        Some(id) => format!("{BACKEND_SCOPE}{id}|{kind}|"),
        None => format!("{ALL_BACKENDS}|{kind}|"),
    }
}

/// Prefixo do escopo seguido da impressão digital do filtro
pub fn cache_key(backend_id: Option<&str>, kind: ResourceKind, scope: &ScopeFilter) -> String {
    format!("{}{}", key_prefix(backend_id, kind), scope.fingerprint())
}

/// Cache das consultas agregadas. Só guarda resultados sem erros.
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    enabled: bool,
    /// Incrementado a cada invalidação; resultados obtidos antes dela não são gravados
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            enabled: !ttl.is_zero(),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), ttl)
    }

    pub fn disabled() -> Self {
        let mut cache = Self::in_memory(Duration::ZERO);
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub async fn get(&self, kind: ResourceKind, scope: &ScopeFilter) -> Option<AggregateResult> {
        if !self.enabled {
            return None;
        }
        let key = cache_key(scope.backend_id.as_deref(), kind, scope);
        let cached = self
            .store
            .get(&key)
            .await
            .and_then(|text| serde_json::from_str::<AggregateResult>(&text).ok());
        match cached {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache hit");
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Grava o resultado se ele não tiver erros e nenhuma invalidação
    /// ocorreu desde `epoch`.
    pub async fn put(
        &self,
        kind: ResourceKind,
        scope: &ScopeFilter,
        result: &AggregateResult,
        epoch: u64,
    ) {
        if !self.enabled || !result.errors.is_empty() || self.epoch() != epoch {
            return;
        }
        let key = cache_key(scope.backend_id.as_deref(), kind, scope);
        match serde_json::to_string(result) {
            Ok(text) => self.store.set(&key, text, self.ttl).await,
            Err(e) => debug!(%key, error = %e, "resultado não serializável, cache ignorado"),
        }
    }

    /// Descarta as consultas do backend e as agregadas do mesmo tipo.
    pub async fn invalidate(&self, backend_id: &str, kind: ResourceKind) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if !self.enabled {
            return;
        }
        let mut removed = 0;
        for prefix in [key_prefix(Some(backend_id), kind), key_prefix(None, kind)] {
            removed += self.store.delete_prefix(&prefix).await;
        }
        debug!(backend = %backend_id, %kind, removed, "cache invalidado");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::{BackendRef, Resource, ResourceStatus};
    use std::collections::BTreeMap;

    fn result(id: &str) -> AggregateResult {
        AggregateResult {
            resources: vec![Resource {
                kind: ResourceKind::Container,
                id: id.to_string(),
                name: id.to_string(),
                status: ResourceStatus::Running,
                labels: BTreeMap::new(),
                backend_ref: BackendRef::new("a"),
                created_at: 0,
                size_bytes: 0,
                attributes: BTreeMap::new(),
            }],
            errors: BTreeMap::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = QueryCache::in_memory(Duration::from_secs(10));
        let scope = ScopeFilter::for_backend("a");
        cache.put(ResourceKind::Container, &scope, &result("c1"), cache.epoch()).await;
        assert!(cache.get(ResourceKind::Container, &scope).await.is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get(ResourceKind::Container, &scope).await.is_none());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn test_invalidation_covers_backend_and_all() {
        let cache = QueryCache::in_memory(Duration::from_secs(10));
        let a = ScopeFilter::for_backend("a");
        let b = ScopeFilter::for_backend("b");
        let all = ScopeFilter::default();
        for scope in [&a, &b, &all] {
            cache.put(ResourceKind::Container, scope, &result("c1"), cache.epoch()).await;
        }
        cache.put(ResourceKind::Image, &a, &result("i1"), cache.epoch()).await;

        cache.invalidate("a", ResourceKind::Container).await;

        assert!(cache.get(ResourceKind::Container, &a).await.is_none());
        assert!(cache.get(ResourceKind::Container, &all).await.is_none());
        assert!(cache.get(ResourceKind::Container, &b).await.is_some());
        assert!(cache.get(ResourceKind::Image, &a).await.is_some());
    }

    #[tokio::test]
    async fn test_backend_named_all_does_not_share_aggregated_entry() {
        let cache = QueryCache::in_memory(Duration::from_secs(10));
        let only_all = ScopeFilter::for_backend("all");
        let aggregated = ScopeFilter::default();
        assert_ne!(
            cache_key(Some("all"), ResourceKind::Container, &aggregated),
            cache_key(None, ResourceKind::Container, &aggregated)
        );

        cache.put(ResourceKind::Container, &aggregated, &result("agg"), cache.epoch()).await;
        assert!(cache.get(ResourceKind::Container, &only_all).await.is_none());

        cache.put(ResourceKind::Container, &only_all, &result("solo"), cache.epoch()).await;
        let hit = cache.get(ResourceKind::Container, &aggregated).await.unwrap();
        assert_eq!(hit.resources[0].id, "agg");
    }

    #[tokio::test]
    async fn test_invalidation_does_not_leak_to_longer_ids() {
        let cache = QueryCache::in_memory(Duration::from_secs(10));
        let a = ScopeFilter::for_backend("a");
        let ab = ScopeFilter::for_backend("ab");
        cache.put(ResourceKind::Container, &a, &result("c1"), cache.epoch()).await;
        cache.put(ResourceKind::Container, &ab, &result("c2"), cache.epoch()).await;

        cache.invalidate("a", ResourceKind::Container).await;
        assert!(cache.get(ResourceKind::Container, &a).await.is_none());
        assert!(cache.get(ResourceKind::Container, &ab).await.is_some());
    }

    #[tokio::test]
    async fn test_partial_results_not_cached() {
        let cache = QueryCache::in_memory(Duration::from_secs(10));
        let scope = ScopeFilter::default();
        let mut partial = result("c1");
        partial
            .errors
            .insert("b".to_string(), CoreError::connection("refused"));
        cache.put(ResourceKind::Container, &scope, &partial, cache.epoch()).await;
        assert!(cache.get(ResourceKind::Container, &scope).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_epoch_is_not_stored() {
        let cache = QueryCache::in_memory(Duration::from_secs(10));
        let scope = ScopeFilter::for_backend("a");
        let epoch = cache.epoch();
        cache.invalidate("a", ResourceKind::Container).await;
        cache.put(ResourceKind::Container, &scope, &result("c1"), epoch).await;
        assert!(cache.get(ResourceKind::Container, &scope).await.is_none());
    }
}
