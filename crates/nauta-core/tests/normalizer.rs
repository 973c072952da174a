use nauta_core::normalizer::{map_status, normalize};
use nauta_core::{BackendKind, BackendRef, ResourceKind, ResourceStatus};
use serde_json::{json, Value};

fn allowed(kind: ResourceKind) -> Vec<ResourceStatus> {
    use ResourceStatus as S;
    let mut statuses = match kind {
        ResourceKind::Container => vec![
            S::Created,
            S::Running,
            S::Paused,
            S::Restarting,
            S::Stopped,
            S::Removing,
            S::Dead,
        ],
        ResourceKind::Image | ResourceKind::Network | ResourceKind::Volume => vec![S::Available],
        ResourceKind::Pod => vec![S::Pending, S::Running, S::Succeeded, S::Failed, S::Terminating],
        ResourceKind::Deployment => {
            vec![S::Available, S::Progressing, S::Stopped, S::Terminating]
        }
        ResourceKind::Service | ResourceKind::Namespace => vec![S::Active, S::Terminating],
    };
    statuses.push(S::Unknown);
    statuses
}

fn samples() -> Vec<Value> {
    vec![
        json!({}),
        json!(null),
        json!("texto solto"),
        json!({ "Id": "abc", "State": "running", "Names": ["/web"] }),
        json!({ "Id": "abc", "State": { "Status": "exited" } }),
        json!({ "Id": "abc", "State": "SomethingNew" }),
        json!({ "Id": 42, "State": 7, "Created": "ontem" }),
        json!({ "Id": "sha256:1", "RepoTags": ["nginx:latest"], "Size": 10 }),
        json!({ "Name": "vol", "Driver": "local" }),
        json!({ "metadata": { "name": "p" }, "status": { "phase": "Running" } }),
        json!({ "metadata": { "name": "p" }, "status": { "phase": "Evicted" } }),
        json!({ "metadata": { "name": "p", "deletionTimestamp": "2024-01-01T00:00:00Z" } }),
        json!({ "metadata": { "name": "d" }, "spec": { "replicas": 0 } }),
        json!({ "metadata": { "name": "d" }, "spec": { "replicas": 3 }, "status": { "availableReplicas": 1 } }),
        json!({ "metadata": { "name": "ns" }, "status": { "phase": "Active" } }),
        json!({ "metadata": [] , "status": "broken" }),
    ]
}

#[test]
fn normalized_status_is_always_canonical() {
    let backend = BackendRef::new("b");
    for backend_kind in [BackendKind::Engine, BackendKind::Cluster] {
        for kind in ResourceKind::ALL {
            let permitted = allowed(kind);
            for raw in samples() {
                let resource = normalize(backend_kind, kind, &raw, &backend);
                assert_eq!(resource.kind, kind);
                assert!(
                    permitted.contains(&resource.status),
                    "{kind} em {backend_kind} produziu {} para {raw}",
                    resource.status
                );
                assert!(!resource.id.is_empty());
                assert!(resource.created_at >= 0);
                assert_eq!(resource.backend_ref.backend_id, "b");
            }
        }
    }
}

#[test]
fn unknown_raw_values_map_to_unknown() {
    for kind in ResourceKind::ALL {
        assert_eq!(map_status(kind, "não-existe"), ResourceStatus::Unknown);
        assert_eq!(map_status(kind, ""), ResourceStatus::Unknown);
    }
    assert_eq!(map_status(ResourceKind::Container, " Running "), ResourceStatus::Running);
}
