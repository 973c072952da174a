//! Núcleo de gerenciamento unificado de recursos de containers.
//!
//! Uma única API para listar, consultar e operar containers, imagens, redes
//! e volumes de engines Docker e pods, deployments, services e namespaces de
//! clusters Kubernetes. O ponto de entrada é [`ResourceCore`].

pub mod adapter;
pub mod aggregator;
pub mod audit;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod model;
pub mod normalizer;
pub mod registry;
pub mod retry;
pub mod service;

pub use crate::aggregator::AggregateResult;
pub use crate::audit::{AuditSink, AuditStats};
pub use crate::config::CoreConfig;
pub use crate::dispatcher::ActionRequest;
pub use crate::error::{CoreError, CoreResult, ErrorKind};
pub use crate::model::{
    Action, ActionParams, BackendInfo, BackendKind, BackendRef, BackendRegistration, LogOptions,
    NodeInfo, OperationRecord, OperationStatus, Resource, ResourceKind, ResourceStatus,
    ScopeFilter,
};
pub use crate::registry::BackendHealth;
pub use crate::service::{ResourceCore, ResourceCoreBuilder};
