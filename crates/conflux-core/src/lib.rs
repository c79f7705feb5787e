//! Core domain types and ports for the conflux capability gateway.
//!
//! This crate has no I/O. Adapters implement the traits in [`ports`];
//! the gateway services in `conflux-gateway` consume them.

#![deny(unsafe_code)]

pub mod domain;
pub mod events;
pub mod ports;

// Re-export commonly used types for convenience
pub use domain::{
    AuditEntry, AuditResult, BackendServer, BackendServerConfig, BackendServerType,
    CapabilityKind, ConnectionStatus, DisplayRule, EnvEntry, GraphError, Hook, HookPhase,
    HookType, InputParam, InvocationContext, NewHook, NodeData, NodeType, PromptArgument,
    PromptRecord, RequestType, ResourceRecord, ResourceTemplateRecord, Token, ToolRecord,
    Workflow, WorkflowEdge, WorkflowNode, sort_hooks,
};
pub use events::GatewayEvent;
pub use ports::{
    AuditSink, BackendConnection, BackendError, BackendServerRepository, ConfigChange,
    ConfigChangeSource, ConnectionFactory, DisplayRuleRepository, GatewayError,
    GatewayEventEmitter, HookRepository, NoopEmitter, NullAuditSink, RpcError, StoreError,
    Stores, TokenRepository, WorkflowRepository, codes,
};
