//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the gateway expects from infrastructure.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No storage or transport types in any signature
//! - Repository traits are minimal and read-focused
//! - Backends are reached only through `BackendConnection`

pub mod audit_sink;
pub mod connection;
pub mod event_emitter;
pub mod gateway_error;
pub mod repository;

use std::sync::Arc;

pub use audit_sink::{AuditSink, NullAuditSink};
pub use connection::{BackendConnection, ConnectionFactory};
pub use event_emitter::{GatewayEventEmitter, NoopEmitter};
pub use gateway_error::{BackendError, GatewayError, RpcError, codes};
pub use repository::{
    BackendServerRepository, ConfigChange, ConfigChangeSource, DisplayRuleRepository,
    HookRepository, StoreError, TokenRepository, WorkflowRepository,
};

/// Container for all storage trait objects.
///
/// Wires one storage implementation into the gateway services without
/// coupling them to it.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryStore::from_seed(seed));
/// let stores = Stores::from_single(store, audit_sink);
/// ```
#[derive(Clone)]
pub struct Stores {
    pub servers: Arc<dyn BackendServerRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub hooks: Arc<dyn HookRepository>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub display_rules: Arc<dyn DisplayRuleRepository>,
    pub changes: Arc<dyn ConfigChangeSource>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Use one object for every configuration port.
    pub fn from_single<S>(store: Arc<S>, audit: Arc<dyn AuditSink>) -> Self
    where
        S: BackendServerRepository
            + TokenRepository
            + HookRepository
            + WorkflowRepository
            + DisplayRuleRepository
            + ConfigChangeSource
            + 'static,
    {
        Self {
            servers: store.clone(),
            tokens: store.clone(),
            hooks: store.clone(),
            workflows: store.clone(),
            display_rules: store.clone(),
            changes: store,
            audit,
        }
    }
}
