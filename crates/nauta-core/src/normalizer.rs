//! Normalização dos objetos brutos dos backends para `Resource`.
//!
//! Funções puras, uma por par (backend, tipo). O mapeamento de status é
//! feito por tabela versionada; valores brutos desconhecidos viram
//! `ResourceStatus::Unknown`.

use crate::model::{
    BackendInfo, BackendKind, BackendRef, NodeInfo, Resource, ResourceKind, ResourceStatus,
};
use chrono::DateTime;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Incrementar ao alterar `STATUS_TABLE`
pub const STATUS_TABLE_VERSION: u32 = 1;

const UNKNOWN: &str = "unknown";

static STATUS_TABLE: Lazy<HashMap<(ResourceKind, &'static str), ResourceStatus>> = Lazy::new(|| {
    use ResourceKind as K;
    use ResourceStatus as S;
    HashMap::from([
        // Estado do container na Engine API
        ((K::Container, "created"), S::Created),
        ((K::Container, "running"), S::Running),
        ((K::Container, "paused"), S::Paused),
        ((K::Container, "restarting"), S::Restarting),
        ((K::Container, "exited"), S::Stopped),
        ((K::Container, "removing"), S::Removing),
        ((K::Container, "dead"), S::Dead),
        // Imagens, redes e volumes não têm estado: existir é estar disponível
        ((K::Image, "present"), S::Available),
        ((K::Network, "present"), S::Available),
        ((K::Volume, "present"), S::Available),
        // Fase do pod
        ((K::Pod, "pending"), S::Pending),
        ((K::Pod, "running"), S::Running),
        ((K::Pod, "succeeded"), S::Succeeded),
        ((K::Pod, "failed"), S::Failed),
        ((K::Pod, "terminating"), S::Terminating),
        // Fase derivada das contagens de réplicas
        ((K::Deployment, "available"), S::Available),
        ((K::Deployment, "progressing"), S::Progressing),
        ((K::Deployment, "scaled_down"), S::Stopped),
        ((K::Deployment, "terminating"), S::Terminating),
        ((K::Service, "present"), S::Active),
        ((K::Service, "terminating"), S::Terminating),
        ((K::Namespace, "active"), S::Active),
        ((K::Namespace, "terminating"), S::Terminating),
    ])
});

/// Mapeia um valor bruto de status para o status canônico.
pub fn map_status(kind: ResourceKind, raw: &str) -> ResourceStatus {
    let lowered = raw.trim().to_lowercase();
    STATUS_TABLE
        .get(&(kind, lowered.as_str()))
        .copied()
        .unwrap_or(ResourceStatus::Unknown)
}

/// Normaliza um objeto bruto. `backend` identifica o backend de origem;
/// o namespace do objeto (quando houver) é incorporado ao `backend_ref`.
pub fn normalize(
    backend_kind: BackendKind,
    kind: ResourceKind,
    raw: &Value,
    backend: &BackendRef,
) -> Resource {
    match (backend_kind, kind) {
        (BackendKind::Engine, ResourceKind::Container) => engine_container(raw, backend),
        (BackendKind::Engine, ResourceKind::Image) => engine_image(raw, backend),
        (BackendKind::Engine, ResourceKind::Network) => engine_network(raw, backend),
        (BackendKind::Engine, ResourceKind::Volume) => engine_volume(raw, backend),
        (BackendKind::Cluster, ResourceKind::Pod) => cluster_pod(raw, backend),
        (BackendKind::Cluster, ResourceKind::Deployment) => cluster_deployment(raw, backend),
        (BackendKind::Cluster, ResourceKind::Service) => cluster_service(raw, backend),
        (BackendKind::Cluster, ResourceKind::Namespace) => cluster_namespace(raw, backend),
        // Par incoerente: devolve o mínimo sem inventar status
        (_, kind) => Resource {
            kind,
            id: str_field(raw, "/Id")
                .or_else(|| str_field(raw, "/metadata/name"))
                .unwrap_or(UNKNOWN)
                .to_string(),
            name: UNKNOWN.to_string(),
            status: ResourceStatus::Unknown,
            labels: BTreeMap::new(),
            backend_ref: BackendRef::new(backend.backend_id.clone()),
            created_at: 0,
            size_bytes: 0,
            attributes: BTreeMap::new(),
        },
    }
}

/// Converte epoch numérico ou RFC 3339 em segundos UTC; ausente ou inválido vira 0.
pub fn parse_timestamp(value: Option<&Value>) -> i64 {
    let secs = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.timestamp())
            .unwrap_or(0),
        _ => 0,
    };
    secs.max(0)
}

fn str_field<'a>(raw: &'a Value, pointer: &str) -> Option<&'a str> {
    raw.pointer(pointer).and_then(Value::as_str)
}

fn u64_field(raw: &Value, pointer: &str) -> u64 {
    raw.pointer(pointer)
        .and_then(|v| v.as_u64().or_else(|| v.as_i64().map(|i| i.max(0) as u64)))
        .unwrap_or(0)
}

fn labels_at(raw: &Value, pointers: &[&str]) -> BTreeMap<String, String> {
    pointers
        .iter()
        .find_map(|p| raw.pointer(p).and_then(Value::as_object))
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

fn put(attributes: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    if let Some(value) = non_empty(value) {
        attributes.insert(key.to_string(), value.to_string());
    }
}

fn engine_container(raw: &Value, backend: &BackendRef) -> Resource {
    // `State` é texto na listagem e objeto na inspeção
    let state = str_field(raw, "/State").or_else(|| str_field(raw, "/State/Status"));
    let name = str_field(raw, "/Names/0")
        .or_else(|| str_field(raw, "/Name"))
        .map(|n| n.trim_start_matches('/'));

    let mut attributes = BTreeMap::new();
    put(
        &mut attributes,
        "image",
        str_field(raw, "/Image").or_else(|| str_field(raw, "/Config/Image")),
    );
    put(&mut attributes, "status_text", str_field(raw, "/Status"));

    Resource {
        kind: ResourceKind::Container,
        id: non_empty(str_field(raw, "/Id")).unwrap_or(UNKNOWN).to_string(),
        name: non_empty(name).unwrap_or(UNKNOWN).to_string(),
        status: state
            .map(|s| map_status(ResourceKind::Container, s))
            .unwrap_or(ResourceStatus::Unknown),
        labels: labels_at(raw, &["/Labels", "/Config/Labels"]),
        backend_ref: BackendRef::new(backend.backend_id.clone()),
        created_at: parse_timestamp(raw.get("Created")),
        size_bytes: u64_field(raw, "/SizeRw"),
        attributes,
    }
}

fn engine_image(raw: &Value, backend: &BackendRef) -> Resource {
    let tags: Vec<&str> = raw
        .get("RepoTags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "<none>:<none>")
                .collect()
        })
        .unwrap_or_default();

    let mut attributes = BTreeMap::new();
    if !tags.is_empty() {
        attributes.insert("tags".to_string(), tags.join(","));
    }

    Resource {
        kind: ResourceKind::Image,
        id: non_empty(str_field(raw, "/Id")).unwrap_or(UNKNOWN).to_string(),
        name: tags.first().copied().unwrap_or(UNKNOWN).to_string(),
        status: map_status(ResourceKind::Image, "present"),
        labels: labels_at(raw, &["/Labels", "/Config/Labels"]),
        backend_ref: BackendRef::new(backend.backend_id.clone()),
        created_at: parse_timestamp(raw.get("Created")),
        size_bytes: u64_field(raw, "/Size"),
        attributes,
    }
}

fn engine_network(raw: &Value, backend: &BackendRef) -> Resource {
    let mut attributes = BTreeMap::new();
    put(&mut attributes, "driver", str_field(raw, "/Driver"));
    put(&mut attributes, "scope", str_field(raw, "/Scope"));

    Resource {
        kind: ResourceKind::Network,
        id: non_empty(str_field(raw, "/Id")).unwrap_or(UNKNOWN).to_string(),
        name: non_empty(str_field(raw, "/Name")).unwrap_or(UNKNOWN).to_string(),
        status: map_status(ResourceKind::Network, "present"),
        labels: labels_at(raw, &["/Labels"]),
        backend_ref: BackendRef::new(backend.backend_id.clone()),
        created_at: parse_timestamp(raw.get("Created")),
        size_bytes: 0,
        attributes,
    }
}

fn engine_volume(raw: &Value, backend: &BackendRef) -> Resource {
    let name = non_empty(str_field(raw, "/Name")).unwrap_or(UNKNOWN);
    let mut attributes = BTreeMap::new();
    put(&mut attributes, "driver", str_field(raw, "/Driver"));
    put(&mut attributes, "mountpoint", str_field(raw, "/Mountpoint"));

    Resource {
        kind: ResourceKind::Volume,
        id: name.to_string(),
        name: name.to_string(),
        status: map_status(ResourceKind::Volume, "present"),
        labels: labels_at(raw, &["/Labels"]),
        backend_ref: BackendRef::new(backend.backend_id.clone()),
        created_at: parse_timestamp(raw.get("CreatedAt")),
        // -1 significa "não calculado" na Engine API
        size_bytes: u64_field(raw, "/UsageData/Size"),
        attributes,
    }
}

/// Campos comuns de `metadata` dos objetos do Kubernetes
struct ObjectMeta<'a> {
    name: &'a str,
    namespace: Option<&'a str>,
    terminating: bool,
    created_at: i64,
    labels: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
}

fn object_meta<'a>(raw: &'a Value) -> ObjectMeta<'a> {
    let namespace = non_empty(str_field(raw, "/metadata/namespace"));
    let mut attributes = BTreeMap::new();
    put(&mut attributes, "uid", str_field(raw, "/metadata/uid"));
    put(&mut attributes, "namespace", namespace);

    ObjectMeta {
        name: non_empty(str_field(raw, "/metadata/name")).unwrap_or(UNKNOWN),
        namespace,
        terminating: raw
            .pointer("/metadata/deletionTimestamp")
            .map(|v| !v.is_null())
            .unwrap_or(false),
        created_at: parse_timestamp(raw.pointer("/metadata/creationTimestamp")),
        labels: labels_at(raw, &["/metadata/labels"]),
        attributes,
    }
}

fn cluster_resource(
    kind: ResourceKind,
    meta: ObjectMeta<'_>,
    status: ResourceStatus,
    backend: &BackendRef,
) -> Resource {
    let backend_ref = match (kind.is_namespaced(), meta.namespace) {
        (true, Some(ns)) => BackendRef::namespaced(backend.backend_id.clone(), ns),
        (true, None) => backend.clone(),
        (false, _) => BackendRef::new(backend.backend_id.clone()),
    };
    Resource {
        kind,
        id: meta.name.to_string(),
        name: meta.name.to_string(),
        status,
        labels: meta.labels,
        backend_ref,
        created_at: meta.created_at,
        size_bytes: 0,
        attributes: meta.attributes,
    }
}

fn cluster_pod(raw: &Value, backend: &BackendRef) -> Resource {
    let mut meta = object_meta(raw);
    let phase = if meta.terminating {
        "terminating"
    } else {
        str_field(raw, "/status/phase").unwrap_or(UNKNOWN)
    };
    put(&mut meta.attributes, "image", str_field(raw, "/spec/containers/0/image"));
    put(&mut meta.attributes, "node", str_field(raw, "/spec/nodeName"));
    put(&mut meta.attributes, "pod_ip", str_field(raw, "/status/podIP"));

    let status = map_status(ResourceKind::Pod, phase);
    cluster_resource(ResourceKind::Pod, meta, status, backend)
}

/// Fase sintética a partir das contagens de réplicas
pub fn deployment_phase(raw: &Value) -> &'static str {
    let terminating = raw
        .pointer("/metadata/deletionTimestamp")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    if terminating {
        return "terminating";
    }
    let desired = raw
        .pointer("/spec/replicas")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    if desired == 0 {
        return "scaled_down";
    }
    let available = u64_field(raw, "/status/availableReplicas");
    let updated = u64_field(raw, "/status/updatedReplicas");
    if available >= desired && updated >= desired {
        "available"
    } else {
        "progressing"
    }
}

fn cluster_deployment(raw: &Value, backend: &BackendRef) -> Resource {
    let mut meta = object_meta(raw);
    let status = map_status(ResourceKind::Deployment, deployment_phase(raw));
    for (key, pointer) in [
        ("replicas", "/spec/replicas"),
        ("ready_replicas", "/status/readyReplicas"),
        ("available_replicas", "/status/availableReplicas"),
    ] {
        if let Some(n) = raw.pointer(pointer).and_then(Value::as_u64) {
            meta.attributes.insert(key.to_string(), n.to_string());
        }
    }
    put(
        &mut meta.attributes,
        "image",
        str_field(raw, "/spec/template/spec/containers/0/image"),
    );
    cluster_resource(ResourceKind::Deployment, meta, status, backend)
}

fn cluster_service(raw: &Value, backend: &BackendRef) -> Resource {
    let mut meta = object_meta(raw);
    let phase = if meta.terminating { "terminating" } else { "present" };
    put(&mut meta.attributes, "type", str_field(raw, "/spec/type"));
    put(&mut meta.attributes, "cluster_ip", str_field(raw, "/spec/clusterIP"));
    let status = map_status(ResourceKind::Service, phase);
    cluster_resource(ResourceKind::Service, meta, status, backend)
}

fn cluster_namespace(raw: &Value, backend: &BackendRef) -> Resource {
    let meta = object_meta(raw);
    let phase = if meta.terminating {
        "terminating"
    } else {
        str_field(raw, "/status/phase").unwrap_or(UNKNOWN)
    };
    let status = map_status(ResourceKind::Namespace, phase);
    cluster_resource(ResourceKind::Namespace, meta, status, backend)
}

const NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";

/// Resumo do backend a partir do objeto devolvido por `system_info`
pub fn normalize_info(backend_kind: BackendKind, backend_id: &str, raw: &Value) -> BackendInfo {
    match backend_kind {
        BackendKind::Engine => engine_info(backend_id, raw),
        BackendKind::Cluster => cluster_info(backend_id, raw),
    }
}

fn engine_info(backend_id: &str, raw: &Value) -> BackendInfo {
    let mut counts = BTreeMap::new();
    for (key, pointer) in [
        ("containers", "/info/Containers"),
        ("containers_running", "/info/ContainersRunning"),
        ("containers_paused", "/info/ContainersPaused"),
        ("containers_stopped", "/info/ContainersStopped"),
        ("images", "/info/Images"),
        ("cpus", "/info/NCPU"),
        ("memory_bytes", "/info/MemTotal"),
    ] {
        counts.insert(key.to_string(), u64_field(raw, pointer));
    }

    let mut attributes = BTreeMap::new();
    put(&mut attributes, "name", str_field(raw, "/info/Name"));
    put(&mut attributes, "operating_system", str_field(raw, "/info/OperatingSystem"));
    put(&mut attributes, "kernel_version", str_field(raw, "/info/KernelVersion"));

    let os = str_field(raw, "/version/Os").or_else(|| str_field(raw, "/info/OSType"));
    let arch = str_field(raw, "/version/Arch").or_else(|| str_field(raw, "/info/Architecture"));

    BackendInfo {
        backend_id: backend_id.to_string(),
        kind: BackendKind::Engine,
        server_version: non_empty(str_field(raw, "/version/Version"))
            .or_else(|| non_empty(str_field(raw, "/info/ServerVersion")))
            .unwrap_or(UNKNOWN)
            .to_string(),
        api_version: non_empty(str_field(raw, "/version/ApiVersion")).map(str::to_string),
        platform: match (non_empty(os), non_empty(arch)) {
            (Some(os), Some(arch)) => Some(format!("{os}/{arch}")),
            (Some(os), None) => Some(os.to_string()),
            _ => None,
        },
        counts,
        attributes,
    }
}

fn cluster_info(backend_id: &str, raw: &Value) -> BackendInfo {
    let list = |pointer: &str| {
        raw.pointer(pointer)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };
    let nodes = list("/nodes");
    let namespaces = list("/namespaces");
    let nodes_ready = nodes.iter().filter(|n| node_ready(n)).count();
    let namespaces_active = namespaces
        .iter()
        .filter(|ns| str_field(ns, "/status/phase") == Some("Active"))
        .count();

    let counts = BTreeMap::from([
        ("nodes".to_string(), nodes.len() as u64),
        ("nodes_ready".to_string(), nodes_ready as u64),
        ("namespaces".to_string(), namespaces.len() as u64),
        ("namespaces_active".to_string(), namespaces_active as u64),
    ]);

    let mut attributes = BTreeMap::new();
    put(&mut attributes, "current_namespace", str_field(raw, "/namespace"));
    put(&mut attributes, "go_version", str_field(raw, "/version/goVersion"));

    let major_minor = match (
        non_empty(str_field(raw, "/version/major")),
        non_empty(str_field(raw, "/version/minor")),
    ) {
        (Some(major), Some(minor)) => Some(format!("{major}.{minor}")),
        _ => None,
    };

    BackendInfo {
        backend_id: backend_id.to_string(),
        kind: BackendKind::Cluster,
        server_version: non_empty(str_field(raw, "/version/gitVersion"))
            .map(str::to_string)
            .or_else(|| major_minor.clone())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        api_version: major_minor,
        platform: non_empty(str_field(raw, "/version/platform")).map(str::to_string),
        counts,
        attributes,
    }
}

fn node_ready(raw: &Value) -> bool {
    raw.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                str_field(c, "/type") == Some("Ready") && str_field(c, "/status") == Some("True")
            })
        })
        .unwrap_or(false)
}

/// Normaliza um nó do Kubernetes
pub fn normalize_node(raw: &Value) -> NodeInfo {
    let labels = labels_at(raw, &["/metadata/labels"]);
    let mut roles: Vec<String> = labels
        .keys()
        .filter_map(|k| k.strip_prefix(NODE_ROLE_PREFIX))
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect();
    if roles.is_empty() {
        if let Some(role) = labels.get("kubernetes.io/role").filter(|r| !r.is_empty()) {
            roles.push(role.clone());
        }
    }

    let internal_ip = raw
        .pointer("/status/addresses")
        .and_then(Value::as_array)
        .and_then(|addresses| {
            addresses
                .iter()
                .find(|a| str_field(a, "/type") == Some("InternalIP"))
                .and_then(|a| str_field(a, "/address"))
        })
        .map(str::to_string);

    let taints = raw
        .pointer("/spec/taints")
        .and_then(Value::as_array)
        .map(|taints| {
            taints
                .iter()
                .map(|t| {
                    let key = str_field(t, "/key").unwrap_or_default();
                    let effect = str_field(t, "/effect").unwrap_or_default();
                    match non_empty(str_field(t, "/value")) {
                        Some(value) => format!("{key}={value}:{effect}"),
                        None => format!("{key}:{effect}"),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let info = |field: &str| {
        non_empty(str_field(raw, &format!("/status/nodeInfo/{field}"))).map(str::to_string)
    };

    NodeInfo {
        name: non_empty(str_field(raw, "/metadata/name"))
            .unwrap_or(UNKNOWN)
            .to_string(),
        ready: node_ready(raw),
        roles,
        kubelet_version: info("kubeletVersion").unwrap_or_else(|| UNKNOWN.to_string()),
        internal_ip,
        os_image: info("osImage"),
        kernel_version: info("kernelVersion"),
        container_runtime: info("containerRuntimeVersion"),
        architecture: info("architecture"),
        created_at: parse_timestamp(raw.pointer("/metadata/creationTimestamp")),
        capacity: labels_at(raw, &["/status/capacity"]),
        allocatable: labels_at(raw, &["/status/allocatable"]),
        labels,
        taints,
    }
}

/// Snapshot sintético de um recurso removido
pub fn removed(kind: ResourceKind, id: &str, backend: &BackendRef) -> Resource {
    Resource {
        kind,
        id: id.to_string(),
        name: id.to_string(),
        status: ResourceStatus::Removed,
        labels: BTreeMap::new(),
        backend_ref: backend.clone(),
        created_at: 0,
        size_bytes: 0,
        attributes: BTreeMap::new(),
    }
}
