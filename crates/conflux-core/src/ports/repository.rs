//! Configuration storage ports.
//!
//! The gateway reads backend configs, tokens, hooks, workflows and display
//! rules through these narrow traits. Implementations own the persistence
//! schema.
//!
//! # Design Rules
//!
//! - Reads return owned domain types, never storage handles
//! - Every write publishes a [`ConfigChange`] to subscribers
//! - `activate_workflow` is the only multi-record write and is atomic

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::{BackendServer, DisplayRule, Hook, NewHook, Token, Workflow};

/// Domain-specific errors for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same identity already exists.
    #[error("Already exists: {0}")]
    Conflict(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Which slice of configuration changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    /// Backend server configs were added, edited or removed.
    Servers,
    /// Tokens changed.
    Tokens,
    /// Any hook was created, edited or deleted.
    Hooks,
    /// Workflows were saved, deleted or (de)activated.
    Workflows,
    /// Display rules changed.
    DisplayRules,
}

/// Publisher-owned subscription to configuration changes.
pub trait ConfigChangeSource: Send + Sync {
    /// Subscribe to future changes. Each receiver sees every change
    /// published after subscribing (subject to channel capacity).
    fn subscribe(&self) -> broadcast::Receiver<ConfigChange>;
}

/// Backend server configurations.
#[async_trait]
pub trait BackendServerRepository: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<BackendServer>, StoreError>;

    /// # Errors
    ///
    /// - `NotFound` if no server with the given id exists
    async fn get_server(&self, id: &str) -> Result<BackendServer, StoreError>;
}

/// Access token lookup (read side only).
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Returns `None` for unknown tokens.
    async fn get_token(&self, id: &str) -> Result<Option<Token>, StoreError>;
}

/// Hook persistence.
#[async_trait]
pub trait HookRepository: Send + Sync {
    async fn list_hooks(&self) -> Result<Vec<Hook>, StoreError>;

    async fn get_hook(&self, id: &str) -> Result<Hook, StoreError>;

    /// Persist a new hook and return it with id and timestamps.
    async fn insert_hook(&self, hook: NewHook) -> Result<Hook, StoreError>;

    /// Replace an existing hook.
    async fn update_hook(&self, hook: &Hook) -> Result<(), StoreError>;

    async fn delete_hook(&self, id: &str) -> Result<(), StoreError>;
}

/// Workflow persistence.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    async fn get_workflow(&self, id: &str) -> Result<Workflow, StoreError>;

    /// Insert or replace by id.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn delete_workflow(&self, id: &str) -> Result<(), StoreError>;

    /// Enable `id` and disable every other enabled workflow of the same
    /// type, as one atomic write.
    async fn activate_workflow(&self, id: &str) -> Result<(), StoreError>;

    /// Disable `id`.
    async fn deactivate_workflow(&self, id: &str) -> Result<(), StoreError>;
}

/// Display rewrite rules.
#[async_trait]
pub trait DisplayRuleRepository: Send + Sync {
    async fn list_display_rules(&self) -> Result<Vec<DisplayRule>, StoreError>;
}
