//! Capability aggregation gateway services.
//!
//! [`AggregationGateway`] fronts every backend kept by the
//! [`ConnectionRegistry`], checking credentials with the
//! [`AccessController`], running the [`HookPipeline`] or the active
//! workflow from the [`WorkflowEngine`], and recording each invocation in
//! the [`AuditLog`].

#![deny(unsafe_code)]

pub mod access;
pub mod audit;
pub(crate) mod client;
pub mod config;
pub mod connector;
pub mod gateway;
pub mod hooks;
pub(crate) mod path;
pub mod protocol;
pub mod registry;
pub mod routing;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Re-export domain types from core for convenience
pub use conflux_core::{
    BackendServer, GatewayEvent, Hook, HookType, InvocationContext, NewHook, RequestType, Token,
    Workflow,
};
pub use conflux_core::ports::{BackendError, GatewayError, RpcError};

// Re-export this crate's public types
pub use access::{AccessController, Principal};
pub use audit::AuditLog;
pub use config::{ANONYMOUS_CLIENT, DEFAULT_PROTOCOL_VERSION, GatewayConfig};
pub use connector::ProcessConnectionFactory;
pub use gateway::AggregationGateway;
pub use hooks::{HookAdminError, HookPipeline, Script, ScriptError};
pub use protocol::{JsonRpcRequest, JsonRpcResponse};
pub use registry::{BackendInfo, ConnectionRegistry, RegistryError};
pub use workflow::{NodeResult, NodeStatus, WorkflowEngine, WorkflowError, WorkflowRun};
