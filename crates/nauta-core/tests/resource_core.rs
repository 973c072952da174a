mod common;

use common::{fixture, fixture_with, registration};
use nauta_core::adapter::SimAdapter;
use nauta_core::{
    Action, ActionRequest, BackendKind, BackendRef, CoreConfig, ErrorKind, OperationStatus,
    ResourceKind, ResourceStatus, ScopeFilter,
};
use std::time::Duration;

fn stop(id: &str, backend: &str) -> ActionRequest {
    ActionRequest::new(ResourceKind::Container, id, BackendRef::new(backend), Action::Stop)
}

#[tokio::test]
async fn unreachable_backend_yields_partial_result() {
    let down = SimAdapter::engine().with_container("c3", "running");
    down.set_reachable(false);
    let f = fixture(&[
        ("a", SimAdapter::engine().with_container("c1", "running")),
        ("b", SimAdapter::engine().with_container("c2", "running")),
        ("c", down),
    ]);

    let result = f
        .core
        .list_resources(ResourceKind::Container, &ScopeFilter::default())
        .await;

    let ids: Vec<_> = result.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors["c"].kind(), ErrorKind::Connection);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_produces_single_record() {
    let sim = SimAdapter::engine().with_container("c1", "running");
    sim.fail_next_actions(1, ErrorKind::Connection);
    let f = fixture(&[("a", sim.clone())]);

    let resource = f
        .core
        .perform_lifecycle_action(stop("c1", "a").with_initiator("ops"))
        .await
        .unwrap();
    assert_eq!(resource.status, ResourceStatus::Stopped);

    let history = f.core.recent_operations(10).await.unwrap();
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.status, OperationStatus::Success);
    assert_eq!(record.operation_type, Action::Stop);
    assert_eq!(record.attempts, 2);
    assert!(record.completed_at.unwrap() > record.requested_at);
}

#[tokio::test]
async fn mutation_invalidates_cached_query() {
    let sim = SimAdapter::engine()
        .with_container("c1", "running")
        .with_container("c2", "running");
    let f = fixture(&[("a", sim.clone())]);
    let scope = ScopeFilter::for_backend("a");

    let first = f.core.list_resources(ResourceKind::Container, &scope).await;
    let second = f.core.list_resources(ResourceKind::Container, &scope).await;
    assert_eq!(first, second);
    assert_eq!(sim.list_calls(), 1);
    assert_eq!(f.core.cache().hits(), 1);

    f.core.perform_lifecycle_action(stop("c1", "a")).await.unwrap();

    let after = f.core.list_resources(ResourceKind::Container, &scope).await;
    assert_eq!(sim.list_calls(), 2);
    let ids: Vec<_> = after.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c2"]);
}

#[tokio::test]
async fn partial_results_are_not_cached() {
    let down = SimAdapter::engine();
    down.set_reachable(false);
    let up = SimAdapter::engine().with_container("c1", "running");
    let f = fixture(&[("a", up.clone()), ("b", down)]);

    let all = ScopeFilter::default();
    f.core.list_resources(ResourceKind::Container, &all).await;
    f.core.list_resources(ResourceKind::Container, &all).await;
    assert_eq!(up.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_entries_expire_after_ttl() {
    let sim = SimAdapter::engine().with_container("c1", "running");
    let mut config = CoreConfig::default();
    config.cache.ttl_secs = 5;
    let f = fixture_with(config, &[("a", sim.clone())]);
    let scope = ScopeFilter::for_backend("a");

    f.core.list_resources(ResourceKind::Container, &scope).await;
    tokio::time::advance(Duration::from_secs(6)).await;
    f.core.list_resources(ResourceKind::Container, &scope).await;
    assert_eq!(sim.list_calls(), 2);
}

#[tokio::test]
async fn disabled_cache_always_queries() {
    let sim = SimAdapter::engine().with_container("c1", "running");
    let mut config = CoreConfig::default();
    config.cache.enabled = false;
    let f = fixture_with(config, &[("a", sim.clone())]);

    for _ in 0..3 {
        f.core
            .list_resources(ResourceKind::Container, &ScopeFilter::default())
            .await;
    }
    assert_eq!(sim.list_calls(), 3);
}

#[tokio::test]
async fn duplicate_name_is_rejected() {
    let f = fixture(&[("a", SimAdapter::engine())]);
    let before = f.core.backends();

    let mut duplicate = registration("b", BackendKind::Engine);
    duplicate.display_name = "Backend a".to_string();
    let err = f.core.register_backend(duplicate).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(f.core.backends(), before);
}

#[tokio::test]
async fn deregistered_backend_is_no_longer_queried() {
    let sim = SimAdapter::engine().with_container("c1", "running");
    let f = fixture(&[("a", sim.clone())]);
    let all = ScopeFilter::default();

    assert_eq!(
        f.core.list_resources(ResourceKind::Container, &all).await.resources.len(),
        1
    );
    f.core.deregister_backend("a").await.unwrap();

    let result = f.core.list_resources(ResourceKind::Container, &all).await;
    assert!(result.resources.is_empty());
    assert!(result.is_complete());
    assert_eq!(sim.list_calls(), 1);
}

#[tokio::test]
async fn cluster_and_engine_resources_stay_apart() {
    let f = fixture(&[
        ("local", SimAdapter::engine().with_container("c1", "running")),
        (
            "kind",
            SimAdapter::cluster()
                .with_pod("default", "web", "Running")
                .with_pod("kube-system", "dns", "Running")
                .with_deployment("default", "api", 2),
        ),
    ]);

    let pods = f
        .core
        .list_resources(ResourceKind::Pod, &ScopeFilter::default())
        .await;
    assert_eq!(pods.resources.len(), 1);
    assert_eq!(pods.resources[0].backend_ref, BackendRef::namespaced("kind", "default"));

    let every_pod = ScopeFilter {
        all_namespaces: true,
        ..ScopeFilter::default()
    };
    let pods = f.core.list_resources(ResourceKind::Pod, &every_pod).await;
    assert_eq!(pods.resources.len(), 2);

    let deployment = f
        .core
        .get_resource(ResourceKind::Deployment, "api", &BackendRef::new("kind"))
        .await
        .unwrap();
    assert_eq!(deployment.status, ResourceStatus::Available);
}

#[tokio::test]
async fn health_reports_each_backend() {
    let down = SimAdapter::cluster();
    down.set_reachable(false);
    let f = fixture(&[("a", SimAdapter::engine()), ("k", down)]);

    let health = f.core.health_status().await;
    assert!(health["a"].reachable);
    assert!(!health["k"].reachable);
    assert!(health.values().all(|h| h.last_checked.is_some()));
}

#[tokio::test(start_paused = true)]
async fn audit_outage_does_not_block_actions() {
    let sim = SimAdapter::engine()
        .with_container("c1", "running")
        .with_container("c2", "running");
    let f = fixture(&[("a", sim)]);
    f.sink.set_available(false);

    f.core.perform_lifecycle_action(stop("c1", "a")).await.unwrap();
    f.core.perform_lifecycle_action(stop("c2", "a")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(f.core.audit_stats().failed_writes >= 1);
    assert!(f.sink.records().is_empty());

    f.sink.set_available(true);
    let history = f.core.recent_operations(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(f.core.audit_stats().dropped, 0);
}
