//! Execução de ações de ciclo de vida.
//!
//! Cada ação passa por: resolução do backend, lock da chave do recurso,
//! validação da transição, chamada ao adapter com timeout e retry das falhas
//! transitórias. O lock é mantido só durante uma tentativa; o backoff acontece
//! fora dele. Toda ação, inclusive as rejeitadas, gera um `OperationRecord`.

use crate::adapter::BackendAdapter;
use crate::audit::AuditRecorder;
use crate::cache::QueryCache;
use crate::config::DispatcherSettings;
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{self, StateTracker};
use crate::lock::KeyedLocks;
use crate::model::{
    Action, ActionParams, BackendKind, BackendRef, OperationRecord, Resource, ResourceKey,
    ResourceKind, ResourceStatus, TargetRef,
};
use crate::normalizer;
use crate::registry::BackendRegistry;
use crate::retry::{CreateRetryPolicy, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pedido de ação sobre um recurso
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub kind: ResourceKind,
    pub id: String,
    pub backend_ref: BackendRef,
    pub action: Action,
    pub params: ActionParams,
    /// Quem pediu (usuário, CLI, serviço)
    pub initiator: String,
    /// Sobrescreve o timeout padrão por tentativa
    pub timeout: Option<Duration>,
}

impl ActionRequest {
    pub fn new(
        kind: ResourceKind,
        id: impl Into<String>,
        backend_ref: BackendRef,
        action: Action,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            backend_ref,
            action,
            params: ActionParams::default(),
            initiator: "system".to_string(),
            timeout: None,
        }
    }

    pub fn with_params(mut self, params: ActionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = initiator.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub action_timeout: Duration,
    pub retry: RetryPolicy,
    pub create_retry: CreateRetryPolicy,
    pub state_staleness: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_settings(&DispatcherSettings::default())
    }
}

impl DispatcherConfig {
    pub fn from_settings(settings: &DispatcherSettings) -> Self {
        Self {
            action_timeout: Duration::from_secs(settings.action_timeout_secs.max(1)),
            retry: RetryPolicy::from_settings(settings),
            create_retry: settings.create_retry,
            state_staleness: Duration::from_secs(settings.state_staleness_secs),
        }
    }
}

/// Alvo já resolvido de uma ação
#[derive(Clone)]
struct Resolved {
    backend_kind: BackendKind,
    adapter: Arc<dyn BackendAdapter>,
    key: ResourceKey,
    params: ActionParams,
    timeout: Duration,
}

pub struct OperationDispatcher {
    registry: Arc<BackendRegistry>,
    tracker: Arc<StateTracker>,
    locks: KeyedLocks<ResourceKey>,
    cache: Option<Arc<QueryCache>>,
    audit: Option<Arc<AuditRecorder>>,
    config: DispatcherConfig,
}

impl OperationDispatcher {
    pub fn new(
        registry: Arc<BackendRegistry>,
        tracker: Arc<StateTracker>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            tracker,
            locks: KeyedLocks::new(),
            cache: None,
            audit: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditRecorder>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Executa a ação e devolve o snapshot do recurso depois dela.
    pub async fn dispatch(&self, request: ActionRequest) -> CoreResult<Resource> {
        let mut record = OperationRecord::begin(
            request.action,
            TargetRef {
                kind: request.kind,
                id: request.id.clone(),
                backend_ref: request.backend_ref.clone(),
            },
            request.initiator.clone(),
        );

        let outcome = self.execute(&request, &mut record).await;

        let finalized = match &outcome {
            Ok(_) => record.mark_success(),
            Err(e) => record.mark_failed(e),
        };
        if let Err(e) = finalized {
            warn!(operation = %record.id, error = %e, "registro de operação inconsistente");
        }
        if let Some(audit) = &self.audit {
            audit.submit(record);
        }
        outcome
    }

    async fn execute(
        &self,
        request: &ActionRequest,
        record: &mut OperationRecord,
    ) -> CoreResult<Resource> {
        let resolved = self.resolve(request)?;
        record.target.backend_ref = resolved.key.backend_ref.clone();

        let max_attempts = match (request.action.is_idempotent(), self.config.create_retry) {
            (false, CreateRetryPolicy::Never) => 1,
            _ => self.config.retry.max_attempts(),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            record.attempts = attempt;

            let result = match self.canonical(&resolved, request.action).await {
                Ok(target) => {
                    let _guard = self.locks.acquire(target.key.clone()).await;
                    self.attempt(request, &target, attempt).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(resource) => {
                    if let Some(cache) = &self.cache {
                        cache
                            .invalidate(&resolved.key.backend_ref.backend_id, request.kind)
                            .await;
                    }
                    info!(
                        action = %request.action,
                        target = %record.target,
                        status = %resource.status,
                        attempts = attempt,
                        "ação concluída"
                    );
                    return Ok(resource);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry.backoff(attempt);
                    warn!(
                        action = %request.action,
                        target = %record.target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "falha transitória, nova tentativa"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        self.registry.mark_stale(&resolved.key.backend_ref.backend_id);
                    }
                    warn!(
                        action = %request.action,
                        target = %record.target,
                        attempts = attempt,
                        error = %e,
                        "ação falhou"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn resolve(&self, request: &ActionRequest) -> CoreResult<Resolved> {
        let (registration, adapter) = self.registry.resolve(&request.backend_ref.backend_id)?;
        let kind = request.kind;

        if request.id.trim().is_empty() {
            return Err(CoreError::validation(format!("{kind} sem identificador")));
        }
        if registration.kind != kind.backend_kind() || !adapter.supports(kind) {
            return Err(CoreError::validation(format!(
                "backend '{}' ({}) não hospeda {kind}",
                registration.id, registration.kind
            )));
        }
        if !lifecycle::supports(kind, request.action) {
            return Err(CoreError::validation(format!(
                "{kind} não suporta a ação {}",
                request.action
            )));
        }

        let backend_ref = if kind.is_namespaced() {
            let namespace = request
                .backend_ref
                .namespace
                .clone()
                .or_else(|| request.params.namespace.clone())
                .or_else(|| adapter.default_namespace());
            BackendRef {
                backend_id: registration.id.clone(),
                namespace,
            }
        } else {
            BackendRef::new(registration.id.clone())
        };

        let mut params = request.params.clone();
        params.namespace = backend_ref.namespace.clone();

        Ok(Resolved {
            backend_kind: registration.kind,
            adapter,
            key: ResourceKey {
                backend_ref,
                kind,
                id: request.id.clone(),
            },
            params,
            timeout: request.timeout.unwrap_or(self.config.action_timeout),
        })
    }

    /// Containers, imagens e redes do engine aceitam nome, id ou prefixo de id.
    /// O lock e as chamadas seguintes usam o id completo, para que apelidos
    /// do mesmo objeto disputem a mesma chave.
    async fn canonical(&self, resolved: &Resolved, action: Action) -> CoreResult<Resolved> {
        let aliased = resolved.backend_kind == BackendKind::Engine
            && resolved.key.kind != ResourceKind::Volume
            && action != Action::Create;
        if !aliased {
            return Ok(resolved.clone());
        }
        let mut target = resolved.clone();
        let full_id = self
            .describe(resolved)
            .await?
            .as_ref()
            .and_then(|raw| raw.get("Id"))
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if let Some(full_id) = full_id {
            if full_id != resolved.key.id {
                debug!(requested = %resolved.key.id, id = %full_id, "alvo resolvido para o id completo");
                target.key.id = full_id;
            }
        }
        Ok(target)
    }

    async fn attempt(
        &self,
        request: &ActionRequest,
        resolved: &Resolved,
        attempt: u32,
    ) -> CoreResult<Resource> {
        let action = request.action;

        if attempt == 1 {
            self.validate_transition(resolved, action)?;
        } else if !action.is_idempotent() && self.took_effect(resolved, action).await? {
            info!(
                %action,
                id = %resolved.key.id,
                "tentativa anterior já surtiu efeito"
            );
            return self.snapshot(resolved, action).await;
        }

        let call = resolved.adapter.perform_action(
            resolved.key.kind,
            &resolved.key.id,
            action,
            &resolved.params,
        );
        match tokio::time::timeout(resolved.timeout, call).await {
            Ok(outcome) => {
                let outcome = outcome?;
                debug!(%action, id = ?outcome.id, "adapter respondeu");
            }
            Err(_) => {
                return Err(CoreError::timeout(
                    resolved.timeout.as_millis() as u64,
                    format!("{action} {} '{}'", resolved.key.kind, resolved.key.id),
                ))
            }
        }

        self.snapshot(resolved, action).await
    }

    /// Rejeita a ação somente se houver observação recente que a torne ilegal.
    fn validate_transition(&self, resolved: &Resolved, action: Action) -> CoreResult<()> {
        if action == Action::Delete && resolved.params.force {
            return Ok(());
        }
        let current = self.tracker.fresh_status(&resolved.key);
        if lifecycle::is_legal(resolved.key.kind, current, action) {
            return Ok(());
        }
        let state = current.unwrap_or(ResourceStatus::Unknown);
        Err(CoreError::validation(format!(
            "{action} ilegal para {} '{}' no estado {state}",
            resolved.key.kind, resolved.key.id
        )))
    }

    /// Confere no backend se uma tentativa anterior de ação não idempotente
    /// já foi aplicada.
    async fn took_effect(&self, resolved: &Resolved, action: Action) -> CoreResult<bool> {
        let raw = self.describe(resolved).await?;
        let applied = match (action, raw) {
            (Action::Create, raw) => raw.is_some(),
            (Action::Scale, Some(raw)) => {
                let wanted = resolved.params.replicas.map(u64::from);
                wanted.is_some() && raw.pointer("/spec/replicas").and_then(|v| v.as_u64()) == wanted
            }
            _ => false,
        };
        Ok(applied)
    }

    async fn describe(&self, resolved: &Resolved) -> CoreResult<Option<serde_json::Value>> {
        let key = &resolved.key;
        tokio::time::timeout(
            resolved.timeout,
            resolved
                .adapter
                .describe(key.kind, &key.id, key.backend_ref.namespace.as_deref()),
        )
        .await
        .map_err(|_| {
            CoreError::timeout(
                resolved.timeout.as_millis() as u64,
                format!("consultar {} '{}'", key.kind, key.id),
            )
        })?
    }

    /// Estado após a ação. Se a consulta falhar, o snapshot é sintetizado
    /// a partir do status esperado.
    async fn snapshot(&self, resolved: &Resolved, action: Action) -> CoreResult<Resource> {
        let key = &resolved.key;
        if action == Action::Delete {
            self.tracker.observe_status(key.clone(), ResourceStatus::Removed);
            return Ok(normalizer::removed(key.kind, &key.id, &key.backend_ref));
        }

        let described = match self.describe(resolved).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(id = %key.id, error = %e, "consulta pós-ação falhou, snapshot sintetizado");
                None
            }
        };

        let resource = match described {
            Some(raw) => normalizer::normalize(resolved.backend_kind, key.kind, &raw, &key.backend_ref),
            None => {
                let mut resource = normalizer::removed(key.kind, &key.id, &key.backend_ref);
                resource.status =
                    lifecycle::expected_status(key.kind, action).unwrap_or(ResourceStatus::Unknown);
                resource
            }
        };
        self.tracker.observe(&resource);
        if resource.id != key.id {
            // Endereçado por nome ou prefixo de id
            self.tracker.observe_status(key.clone(), resource.status);
        }
        Ok(resource)
    }
}
