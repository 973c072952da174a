#![allow(dead_code)]

pub mod http;

use nauta_core::adapter::{SimAdapter, SimAdapterFactory};
use nauta_core::audit::MemoryAuditSink;
use nauta_core::config::{ClusterConnection, ConnectionParams, EngineConnection};
use nauta_core::{BackendKind, BackendRegistration, CoreConfig, ResourceCore};
use std::sync::Arc;

pub struct Fixture {
    pub core: Arc<ResourceCore>,
    pub sink: Arc<MemoryAuditSink>,
}

pub fn registration(id: &str, kind: BackendKind) -> BackendRegistration {
    let connection = match kind {
        BackendKind::Engine => ConnectionParams::Engine(EngineConnection::default()),
        BackendKind::Cluster => ConnectionParams::Cluster(ClusterConnection::default()),
    };
    BackendRegistration::new(id, format!("Backend {id}"), connection)
}

/// Núcleo com os simuladores registrados nos ids dados
pub fn fixture(backends: &[(&str, SimAdapter)]) -> Fixture {
    fixture_with(CoreConfig::default(), backends)
}

pub fn fixture_with(config: CoreConfig, backends: &[(&str, SimAdapter)]) -> Fixture {
    let mut factory = SimAdapterFactory::new();
    for (id, sim) in backends {
        factory = factory.with_adapter(id, sim.clone());
    }
    let sink = Arc::new(MemoryAuditSink::new());
    let core = ResourceCore::builder(config)
        .with_factory(Arc::new(factory))
        .with_audit_sink(sink.clone())
        .build()
        .expect("núcleo deveria iniciar");

    for (id, sim) in backends {
        use nauta_core::adapter::BackendAdapter;
        core.register_backend(registration(id, sim.backend_kind()))
            .expect("registro deveria ser aceito");
    }

    Fixture {
        core: Arc::new(core),
        sink,
    }
}
