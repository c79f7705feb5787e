//! Core domain types.
//!
//! These types represent the pure domain model, independent of any
//! infrastructure concerns (storage, processes, transports).
//!
//! # Structure
//!
//! - `backend` - Backend server configuration and connection status
//! - `capability` - Tool / resource / prompt records and display rules
//! - `token` - Access tokens
//! - `hook` - Interception hooks
//! - `workflow` - Workflow DAGs and their graph checks
//! - `context` - Per-invocation context
//! - `audit` - Audit log entries

pub mod audit;
pub mod backend;
pub mod capability;
pub mod context;
pub mod hook;
pub mod token;
pub mod workflow;

pub use audit::{AuditEntry, AuditResult};
pub use backend::{
    BackendServer, BackendServerConfig, BackendServerType, ConnectionStatus, EnvEntry, InputParam,
};
pub use capability::{
    CapabilityKind, DisplayRule, PromptArgument, PromptRecord, ResourceRecord,
    ResourceTemplateRecord, ToolRecord,
};
pub use context::{InvocationContext, RequestType};
pub use hook::{Hook, HookPhase, HookType, NewHook, sort_hooks};
pub use token::Token;
pub use workflow::{GraphError, NodeData, NodeType, Workflow, WorkflowEdge, WorkflowNode};
