//! Locks assíncronos por chave, criados sob demanda.
//!
//! Cada chave tem um `tokio::sync::Mutex<()>` (FIFO justo); a entrada
//! some do mapa quando o último interessado a libera.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A partir deste tamanho, entradas órfãs (de aquisições canceladas) são varridas
const SWEEP_THRESHOLD: usize = 1024;

type LockMap<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

pub struct KeyedLocks<K> {
    inner: LockMap<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> std::fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("keys", &self.inner.lock().len())
            .finish()
    }
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Espera a vez na fila da chave e devolve a guarda exclusiva.
    pub async fn acquire(&self, key: K) -> KeyGuard<K> {
        let lock = {
            let mut map = self.inner.lock();
            if map.len() >= SWEEP_THRESHOLD {
                map.retain(|_, l| Arc::strong_count(l) > 1);
            }
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        KeyGuard {
            key,
            map: Arc::clone(&self.inner),
            lock,
            guard: Some(guard),
        }
    }

    /// Quantidade de chaves com lock vivo
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guarda de uma chave. Ao ser descartada libera o lock e, se ninguém
/// mais estiver esperando, remove a entrada do mapa.
pub struct KeyGuard<K: Hash + Eq> {
    key: K,
    map: LockMap<K>,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Hash + Eq> KeyGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Hash + Eq> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.map.lock();
        let idle = map
            .get(&self.key)
            .map(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2)
            .unwrap_or(false);
        if idle {
            map.remove(&self.key);
        }
    }
}
