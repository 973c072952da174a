//! Backend simulado em memória.
//!
//! Produz objetos brutos no formato do engine ou do cluster, aceita falhas
//! programadas e registra o intervalo de execução de cada ação. Usado nos
//! testes do núcleo e por quem embute a biblioteca.

use super::{
    check_logs_kind, unsupported_action, unsupported_kind, ActionOutcome, BackendAdapter, RawStream,
};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::model::{
    Action, ActionParams, BackendKind, BackendRegistration, LogOptions, ResourceKind, ScopeFilter,
};
use crate::registry::AdapterFactory;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Objeto guardado pelo simulador. `state` segue o vocabulário nativo do
/// tipo (`running`/`exited` para containers, fase para pods e namespaces).
#[derive(Debug, Clone, PartialEq)]
pub struct SimObject {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub namespace: Option<String>,
    pub state: String,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub replicas: u32,
    pub size_bytes: u64,
    pub created_at: i64,
    pub log_lines: Vec<String>,
}

impl SimObject {
    pub fn new(kind: ResourceKind, id: impl Into<String>, state: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind,
            name: id.clone(),
            id,
            namespace: kind.is_namespaced().then(|| "default".to_string()),
            state: state.into(),
            labels: BTreeMap::new(),
            image: String::new(),
            replicas: 0,
            size_bytes: 0,
            created_at: 1_700_000_000,
            log_lines: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn labeled(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_log_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    fn log_text(&self, options: &LogOptions) -> String {
        let skip = options
            .tail
            .map(|n| self.log_lines.len().saturating_sub(n as usize))
            .unwrap_or(0);
        let stamp = self.created_rfc3339();
        self.log_lines[skip..]
            .iter()
            .map(|line| {
                if options.timestamps {
                    format!("{stamp} {line}\n")
                } else {
                    format!("{line}\n")
                }
            })
            .collect()
    }

    fn slot(&self) -> Slot {
        (
            self.kind,
            self.namespace.clone().unwrap_or_default(),
            self.id.clone(),
        )
    }

    fn created_rfc3339(&self) -> String {
        Utc.timestamp_opt(self.created_at, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    }

    /// Renderiza no formato bruto do backend
    pub fn render(&self) -> Value {
        match self.kind {
            ResourceKind::Container => json!({
                "Id": self.id,
                "Names": [format!("/{}", self.name)],
                "Image": self.image,
                "State": self.state,
                "Labels": self.labels,
                "Created": self.created_at,
                "SizeRw": self.size_bytes,
            }),
            ResourceKind::Image => json!({
                "Id": self.id,
                "RepoTags": [self.name],
                "Labels": self.labels,
                "Created": self.created_at,
                "Size": self.size_bytes,
            }),
            ResourceKind::Network => json!({
                "Id": self.id,
                "Name": self.name,
                "Driver": "bridge",
                "Scope": "local",
                "Labels": self.labels,
                "Created": self.created_rfc3339(),
            }),
            ResourceKind::Volume => json!({
                "Name": self.id,
                "Driver": "local",
                "Labels": self.labels,
                "CreatedAt": self.created_rfc3339(),
                "UsageData": { "Size": self.size_bytes },
            }),
            _ => self.render_cluster(),
        }
    }

    fn render_cluster(&self) -> Value {
        let mut metadata = json!({
            "name": self.id,
            "uid": format!("uid-{}", self.id),
            "labels": self.labels,
            "creationTimestamp": self.created_rfc3339(),
        });
        if let Some(ns) = &self.namespace {
            metadata["namespace"] = json!(ns);
        }
        if self.state == "Terminating" {
            metadata["deletionTimestamp"] = json!(self.created_rfc3339());
        }

        match self.kind {
            ResourceKind::Pod => json!({
                "metadata": metadata,
                "spec": { "containers": [{ "name": self.id, "image": self.image }] },
                "status": { "phase": self.state },
            }),
            ResourceKind::Deployment => json!({
                "metadata": metadata,
                "spec": { "replicas": self.replicas },
                "status": {
                    "replicas": self.replicas,
                    "readyReplicas": self.replicas,
                    "availableReplicas": self.replicas,
                    "updatedReplicas": self.replicas,
                },
            }),
            ResourceKind::Service => json!({
                "metadata": metadata,
                "spec": { "type": "ClusterIP", "clusterIP": "10.96.0.10" },
            }),
            _ => json!({
                "metadata": metadata,
                "status": { "phase": self.state },
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FaultMode {
    /// Falha sem aplicar a ação
    Before,
    /// Aplica a ação e ainda assim devolve erro (ex.: resposta perdida)
    AfterApply,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: ErrorKind,
    mode: FaultMode,
}

/// Intervalo em que uma ação esteve em execução no simulador
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub id: String,
    pub action: Action,
    pub started: Instant,
    pub finished: Instant,
}

/// Nó simulado de um cluster
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    pub name: String,
    pub ready: bool,
    pub roles: Vec<String>,
}

impl SimNode {
    pub fn render(&self) -> Value {
        let labels: BTreeMap<String, String> = self
            .roles
            .iter()
            .map(|role| (format!("node-role.kubernetes.io/{role}"), String::new()))
            .chain([("kubernetes.io/hostname".to_string(), self.name.clone())])
            .collect();
        json!({
            "metadata": {
                "name": self.name,
                "labels": labels,
                "creationTimestamp": "2023-11-14T22:13:20Z",
            },
            "status": {
                "conditions": [{
                    "type": "Ready",
                    "status": if self.ready { "True" } else { "False" },
                }],
                "addresses": [{ "type": "InternalIP", "address": "10.0.0.10" }],
                "nodeInfo": {
                    "kubeletVersion": "v1.29.0",
                    "osImage": "Sim Linux",
                    "kernelVersion": "6.1.0",
                    "containerRuntimeVersion": "containerd://1.7.0",
                    "architecture": "amd64",
                },
                "capacity": { "cpu": "4", "memory": "8Gi", "pods": "110" },
                "allocatable": { "cpu": "4", "memory": "7Gi", "pods": "110" },
            },
        })
    }
}

struct SimState {
    objects: BTreeMap<Slot, SimObject>,
    nodes: Vec<SimNode>,
    faults: VecDeque<Fault>,
    reachable: bool,
    action_delay: Duration,
    list_delay: Duration,
    executions: Vec<Execution>,
}

struct SimInner {
    kind: BackendKind,
    state: Mutex<SimState>,
    list_calls: AtomicUsize,
    action_calls: AtomicUsize,
    describe_calls: AtomicUsize,
}

#[derive(Clone)]
pub struct SimAdapter {
    inner: Arc<SimInner>,
}

impl std::fmt::Debug for SimAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimAdapter")
            .field("kind", &self.inner.kind)
            .field("objects", &self.inner.state.lock().objects.len())
            .finish()
    }
}

impl SimAdapter {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            inner: Arc::new(SimInner {
                kind,
                state: Mutex::new(SimState {
                    objects: BTreeMap::new(),
                    nodes: Vec::new(),
                    faults: VecDeque::new(),
                    reachable: true,
                    action_delay: Duration::ZERO,
                    list_delay: Duration::ZERO,
                    executions: Vec::new(),
                }),
                list_calls: AtomicUsize::new(0),
                action_calls: AtomicUsize::new(0),
                describe_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn engine() -> Self {
        Self::new(BackendKind::Engine)
    }

    pub fn cluster() -> Self {
        Self::new(BackendKind::Cluster)
    }

    pub fn with(self, object: SimObject) -> Self {
        self.insert(object);
        self
    }

    pub fn with_container(self, id: &str, state: &str) -> Self {
        self.with(SimObject::new(ResourceKind::Container, id, state))
    }

    pub fn with_pod(self, namespace: &str, name: &str, phase: &str) -> Self {
        self.with(SimObject::new(ResourceKind::Pod, name, phase).in_namespace(namespace))
    }

    pub fn with_deployment(self, namespace: &str, name: &str, replicas: u32) -> Self {
        self.with(
            SimObject::new(ResourceKind::Deployment, name, "")
                .in_namespace(namespace)
                .with_replicas(replicas),
        )
    }

    pub fn with_node(self, name: &str, ready: bool, roles: &[&str]) -> Self {
        self.inner.state.lock().nodes.push(SimNode {
            name: name.to_string(),
            ready,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        });
        self
    }

    pub fn insert(&self, object: SimObject) {
        self.inner.state.lock().objects.insert(object.slot(), object);
    }

    pub fn object(&self, kind: ResourceKind, namespace: Option<&str>, id: &str) -> Option<SimObject> {
        let key = (kind, namespace.unwrap_or_default().to_string(), id.to_string());
        self.inner.state.lock().objects.get(&key).cloned()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.state.lock().reachable = reachable;
    }

    /// As próximas `count` ações falham com `kind` sem surtir efeito
    pub fn fail_next_actions(&self, count: usize, kind: ErrorKind) {
        let mut state = self.inner.state.lock();
        for _ in 0..count {
            state.faults.push_back(Fault {
                kind,
                mode: FaultMode::Before,
            });
        }
    }

    /// As próximas `count` ações surtem efeito mas devolvem `kind`
    pub fn fail_after_apply(&self, count: usize, kind: ErrorKind) {
        let mut state = self.inner.state.lock();
        for _ in 0..count {
            state.faults.push_back(Fault {
                kind,
                mode: FaultMode::AfterApply,
            });
        }
    }

    pub fn set_action_delay(&self, delay: Duration) {
        self.inner.state.lock().action_delay = delay;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.inner.state.lock().list_delay = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn action_calls(&self) -> usize {
        self.inner.action_calls.load(Ordering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.inner.describe_calls.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.inner.state.lock().executions.clone()
    }

    fn unreachable() -> CoreError {
        CoreError::connection("sim: connection refused")
    }

    fn namespace_key(&self, kind: ResourceKind, namespace: Option<&str>) -> String {
        if kind.is_namespaced() {
            namespace.unwrap_or("default").to_string()
        } else {
            String::new()
        }
    }

    fn apply(
        &self,
        kind: ResourceKind,
        id: &str,
        action: Action,
        params: &ActionParams,
    ) -> CoreResult<ActionOutcome> {
        let ns = self.namespace_key(kind, params.namespace.as_deref());
        let mut state = self.inner.state.lock();
        let found = lookup(&state.objects, kind, &ns, id);

        if action == Action::Create {
            let key = (kind, ns.clone(), id.to_string());
            if found.is_some() || state.objects.contains_key(&key) {
                return Err(CoreError::validation(format!("conflict: {kind} '{id}' já existe")));
            }
            let initial = match kind {
                ResourceKind::Container => "created",
                ResourceKind::Pod => "Running",
                ResourceKind::Namespace => "Active",
                _ => "",
            };
            let mut object = SimObject::new(kind, id, initial);
            object.namespace = kind.is_namespaced().then(|| ns.clone());
            object.labels = params.labels.clone();
            object.image = params.image.clone().unwrap_or_default();
            object.replicas = params.replicas.unwrap_or(1);
            object.created_at = Utc::now().timestamp();
            state.objects.insert(key, object);
            return Ok(ActionOutcome::with_id(id));
        }

        let key = found.ok_or_else(|| CoreError::not_found(format!("no such {kind}: {id}")))?;
        let Some(object) = state.objects.get_mut(&key) else {
            return Err(CoreError::not_found(format!("no such {kind}: {id}")));
        };

        match (kind, action) {
            (_, Action::Delete) => {
                if kind == ResourceKind::Container && object.state == "running" && !params.force {
                    return Err(CoreError::validation(format!(
                        "conflict: cannot remove running container {id}"
                    )));
                }
                state.objects.remove(&key);
            }
            (ResourceKind::Container, Action::Start)
            | (ResourceKind::Container, Action::Restart) => object.state = "running".into(),
            (ResourceKind::Container, Action::Stop) => object.state = "exited".into(),
            (ResourceKind::Container, Action::Pause) => {
                if object.state != "running" {
                    return Err(CoreError::validation(format!("conflict: container {id} is not running")));
                }
                object.state = "paused".into();
            }
            (ResourceKind::Container, Action::Unpause) => {
                if object.state != "paused" {
                    return Err(CoreError::validation(format!("conflict: container {id} is not paused")));
                }
                object.state = "running".into();
            }
            (ResourceKind::Deployment, Action::Scale) => {
                object.replicas = params
                    .replicas
                    .ok_or_else(|| CoreError::validation("réplicas obrigatórias"))?;
            }
            (ResourceKind::Deployment, Action::Restart) => {}
            (kind, action) => return Err(unsupported_action(kind, action)),
        }
        Ok(ActionOutcome::with_id(id))
    }
}

type Slot = (ResourceKind, String, String);

/// Como o engine: id exato, nome ou prefixo único de id. No cluster só o nome.
fn lookup(objects: &BTreeMap<Slot, SimObject>, kind: ResourceKind, ns: &str, id: &str) -> Option<Slot> {
    let exact = (kind, ns.to_string(), id.to_string());
    if objects.contains_key(&exact) {
        return Some(exact);
    }
    if kind.backend_kind() != BackendKind::Engine || id.is_empty() {
        return None;
    }
    let same_kind = || objects.values().filter(|o| o.kind == kind);
    if let Some(named) = same_kind().find(|o| o.name == id) {
        return Some(named.slot());
    }
    let mut prefixed = same_kind().filter(|o| o.id.starts_with(id));
    match (prefixed.next(), prefixed.next()) {
        (Some(only), None) => Some(only.slot()),
        _ => None,
    }
}

fn matches_scope(object: &SimObject, scope: &ScopeFilter) -> bool {
    if object.kind.is_namespaced() && !scope.all_namespaces {
        let wanted = scope.namespace.as_deref().unwrap_or("default");
        if object.namespace.as_deref() != Some(wanted) {
            return false;
        }
    }
    if object.kind == ResourceKind::Container
        && !scope.include_stopped
        && !matches!(object.state.as_str(), "running" | "paused" | "restarting")
    {
        return false;
    }
    scope
        .labels
        .iter()
        .all(|(k, v)| object.labels.get(k) == Some(v))
}

#[async_trait]
impl BackendAdapter for SimAdapter {
    fn backend_kind(&self) -> BackendKind {
        self.inner.kind
    }

    fn default_namespace(&self) -> Option<String> {
        (self.inner.kind == BackendKind::Cluster).then(|| "default".to_string())
    }

    fn list_resources(&self, kind: ResourceKind, scope: &ScopeFilter) -> RawStream {
        let inner = Arc::clone(&self.inner);
        let supported = self.supports(kind);
        let scope = scope.clone();

        let fetch = async move {
            inner.list_calls.fetch_add(1, Ordering::SeqCst);
            if !supported {
                return Err(unsupported_kind(inner.kind, kind));
            }
            let delay = inner.state.lock().list_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let state = inner.state.lock();
            if !state.reachable {
                return Err(SimAdapter::unreachable());
            }
            Ok(state
                .objects
                .values()
                .filter(|o| o.kind == kind && matches_scope(o, &scope))
                .map(SimObject::render)
                .collect::<Vec<_>>())
        };

        stream::once(fetch)
            .map_ok(|items| stream::iter(items.into_iter().map(Ok::<Value, CoreError>)))
            .try_flatten()
            .boxed()
    }

    async fn perform_action(
        &self,
        kind: ResourceKind,
        id: &str,
        action: Action,
        params: &ActionParams,
    ) -> CoreResult<ActionOutcome> {
        self.inner.action_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports(kind) {
            return Err(unsupported_kind(self.inner.kind, kind));
        }

        let (reachable, fault, delay) = {
            let mut state = self.inner.state.lock();
            (state.reachable, state.faults.pop_front(), state.action_delay)
        };
        if !reachable {
            return Err(Self::unreachable());
        }
        if let Some(Fault {
            kind: error_kind,
            mode: FaultMode::Before,
        }) = fault
        {
            return Err(CoreError::of_kind(error_kind, "sim: falha programada"));
        }

        let started = Instant::now();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.apply(kind, id, action, params);
        self.inner.state.lock().executions.push(Execution {
            id: id.to_string(),
            action,
            started,
            finished: Instant::now(),
        });

        match (result, fault) {
            (
                Ok(_),
                Some(Fault {
                    kind: error_kind,
                    mode: FaultMode::AfterApply,
                }),
            ) => Err(CoreError::of_kind(error_kind, "sim: resposta perdida")),
            (result, _) => result,
        }
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        id: &str,
        namespace: Option<&str>,
    ) -> CoreResult<Option<Value>> {
        self.inner.describe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports(kind) {
            return Err(unsupported_kind(self.inner.kind, kind));
        }
        let ns = self.namespace_key(kind, namespace);
        let state = self.inner.state.lock();
        if !state.reachable {
            return Err(Self::unreachable());
        }
        Ok(lookup(&state.objects, kind, &ns, id)
            .and_then(|key| state.objects.get(&key))
            .map(SimObject::render))
    }

    async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        namespace: Option<&str>,
        options: &LogOptions,
    ) -> CoreResult<String> {
        check_logs_kind(self.inner.kind, kind)?;
        let ns = self.namespace_key(kind, namespace);
        let state = self.inner.state.lock();
        if !state.reachable {
            return Err(Self::unreachable());
        }
        lookup(&state.objects, kind, &ns, id)
            .and_then(|key| state.objects.get(&key))
            .map(|object| object.log_text(options))
            .ok_or_else(|| CoreError::not_found(format!("no such {kind}: {id}")))
    }

    async fn system_info(&self) -> CoreResult<Value> {
        let state = self.inner.state.lock();
        if !state.reachable {
            return Err(Self::unreachable());
        }
        let objects = &state.objects;
        let of_kind = |kind: ResourceKind| objects.values().filter(move |o| o.kind == kind);
        match self.inner.kind {
            BackendKind::Engine => {
                let containers: Vec<&SimObject> = of_kind(ResourceKind::Container).collect();
                let in_state =
                    |wanted: &str| containers.iter().filter(|c| c.state == wanted).count();
                let running = in_state("running");
                let paused = in_state("paused");
                Ok(json!({
                    "info": {
                        "Name": "sim",
                        "Containers": containers.len(),
                        "ContainersRunning": running,
                        "ContainersPaused": paused,
                        "ContainersStopped": containers.len() - running - paused,
                        "Images": of_kind(ResourceKind::Image).count(),
                        "OperatingSystem": "Sim Linux",
                        "KernelVersion": "6.1.0",
                        "NCPU": 4,
                        "MemTotal": 8_589_934_592u64,
                    },
                    "version": {
                        "Version": "24.0.0-sim",
                        "ApiVersion": "1.43",
                        "Os": "linux",
                        "Arch": "amd64",
                    },
                }))
            }
            BackendKind::Cluster => Ok(json!({
                "version": {
                    "major": "1",
                    "minor": "29",
                    "gitVersion": "v1.29.0-sim",
                    "platform": "linux/amd64",
                },
                "nodes": state.nodes.iter().map(SimNode::render).collect::<Vec<_>>(),
                "namespaces": of_kind(ResourceKind::Namespace)
                    .map(SimObject::render)
                    .collect::<Vec<_>>(),
                "namespace": "default",
            })),
        }
    }

    async fn list_nodes(&self) -> CoreResult<Vec<Value>> {
        if self.inner.kind != BackendKind::Cluster {
            return Err(CoreError::validation("backend engine não possui nós"));
        }
        let state = self.inner.state.lock();
        if !state.reachable {
            return Err(Self::unreachable());
        }
        Ok(state.nodes.iter().map(SimNode::render).collect())
    }

    async fn health_check(&self) -> bool {
        self.inner.state.lock().reachable
    }
}

/// Fábrica que entrega simuladores pré-cadastrados por id de backend
/// (ou cria um vazio do tipo certo) e conta as construções.
#[derive(Default)]
pub struct SimAdapterFactory {
    adapters: Mutex<HashMap<String, SimAdapter>>,
    builds: Mutex<HashMap<String, usize>>,
}

impl SimAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(self, backend_id: &str, adapter: SimAdapter) -> Self {
        self.adapters.lock().insert(backend_id.to_string(), adapter);
        self
    }

    pub fn adapter(&self, backend_id: &str) -> Option<SimAdapter> {
        self.adapters.lock().get(backend_id).cloned()
    }

    pub fn builds(&self, backend_id: &str) -> usize {
        self.builds.lock().get(backend_id).copied().unwrap_or(0)
    }
}

impl AdapterFactory for SimAdapterFactory {
    fn build(&self, registration: &BackendRegistration) -> CoreResult<Arc<dyn BackendAdapter>> {
        *self.builds.lock().entry(registration.id.clone()).or_insert(0) += 1;
        let adapter = self
            .adapters
            .lock()
            .entry(registration.id.clone())
            .or_insert_with(|| SimAdapter::new(registration.kind))
            .clone();
        Ok(Arc::new(adapter))
    }
}
