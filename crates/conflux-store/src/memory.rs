//! In-memory implementation of every configuration port.
//!
//! Records live behind one `RwLock`, so multi-record writes such as
//! workflow activation are atomic. Each successful write publishes a
//! [`ConfigChange`] on a broadcast channel.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use conflux_core::ports::{
    BackendServerRepository, ConfigChange, ConfigChangeSource, DisplayRuleRepository,
    HookRepository, StoreError, TokenRepository, WorkflowRepository,
};
use conflux_core::{BackendServer, DisplayRule, Hook, NewHook, Token, Workflow};

use crate::seed::Seed;

/// Capacity of the change channel. Slow subscribers see `Lagged` and
/// should reload everything.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct StoreState {
    /// Declaration order is the enumeration order used by discovery.
    servers: Vec<BackendServer>,
    tokens: Vec<Token>,
    hooks: Vec<Hook>,
    workflows: Vec<Workflow>,
    display_rules: Vec<DisplayRule>,
}

/// Configuration store held entirely in memory.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    changes: broadcast::Sender<ConfigChange>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::from_seed(Seed::default())
    }

    /// Create a store pre-populated from a seed document.
    pub fn from_seed(seed: Seed) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState {
                servers: seed.servers,
                tokens: seed.tokens,
                hooks: seed.hooks,
                workflows: seed.workflows,
                display_rules: seed.display_rules,
            }),
            changes,
        }
    }

    fn publish(&self, change: ConfigChange) {
        if let Err(unsent) = self.changes.send(change) {
            tracing::debug!(change = ?unsent.0, "No change listeners yet");
        }
    }

    /// Insert or replace a backend server config by id.
    pub async fn upsert_server(&self, server: BackendServer) -> Result<(), StoreError> {
        if server.id.is_empty() {
            return Err(StoreError::Internal("server id cannot be empty".into()));
        }
        {
            let mut state = self.state.write().await;
            match state.servers.iter_mut().find(|s| s.id == server.id) {
                Some(existing) => *existing = server,
                None => state.servers.push(server),
            }
        }
        self.publish(ConfigChange::Servers);
        Ok(())
    }

    /// Remove a backend server config.
    pub async fn remove_server(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let before = state.servers.len();
            state.servers.retain(|s| s.id != id);
            if state.servers.len() == before {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }
        self.publish(ConfigChange::Servers);
        Ok(())
    }

    /// Insert or replace a token.
    pub async fn put_token(&self, token: Token) {
        {
            let mut state = self.state.write().await;
            state.tokens.retain(|t| t.id != token.id);
            state.tokens.push(token);
        }
        self.publish(ConfigChange::Tokens);
    }

    /// Replace the full display rule set.
    pub async fn set_display_rules(&self, rules: Vec<DisplayRule>) {
        self.state.write().await.display_rules = rules;
        self.publish(ConfigChange::DisplayRules);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigChangeSource for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl BackendServerRepository for MemoryStore {
    async fn list_servers(&self) -> Result<Vec<BackendServer>, StoreError> {
        Ok(self.state.read().await.servers.clone())
    }

    async fn get_server(&self, id: &str) -> Result<BackendServer, StoreError> {
        self.state
            .read()
            .await
            .servers
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn get_token(&self, id: &str) -> Result<Option<Token>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tokens
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }
}

#[async_trait]
impl HookRepository for MemoryStore {
    async fn list_hooks(&self) -> Result<Vec<Hook>, StoreError> {
        Ok(self.state.read().await.hooks.clone())
    }

    async fn get_hook(&self, id: &str) -> Result<Hook, StoreError> {
        self.state
            .read()
            .await
            .hooks
            .iter()
            .find(|h| h.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn insert_hook(&self, hook: NewHook) -> Result<Hook, StoreError> {
        let now = Utc::now();
        let hook = Hook {
            id: Uuid::new_v4().to_string(),
            name: hook.name,
            description: hook.description,
            enabled: hook.enabled,
            execution_order: hook.execution_order,
            hook_type: hook.hook_type,
            script: hook.script,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.hooks.push(hook.clone());
        self.publish(ConfigChange::Hooks);
        Ok(hook)
    }

    async fn update_hook(&self, hook: &Hook) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let existing = state
                .hooks
                .iter_mut()
                .find(|h| h.id == hook.id)
                .ok_or_else(|| StoreError::NotFound(hook.id.clone()))?;
            *existing = Hook {
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..hook.clone()
            };
        }
        self.publish(ConfigChange::Hooks);
        Ok(())
    }

    async fn delete_hook(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let before = state.hooks.len();
            state.hooks.retain(|h| h.id != id);
            if state.hooks.len() == before {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }
        self.publish(ConfigChange::Hooks);
        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for MemoryStore {
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.state.read().await.workflows.clone())
    }

    async fn get_workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        self.state
            .read()
            .await
            .workflows
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let mut workflow = workflow.clone();
            workflow.updated_at = Utc::now();
            match state.workflows.iter_mut().find(|w| w.id == workflow.id) {
                Some(existing) => {
                    workflow.created_at = existing.created_at;
                    *existing = workflow;
                }
                None => state.workflows.push(workflow),
            }
        }
        self.publish(ConfigChange::Workflows);
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let before = state.workflows.len();
            state.workflows.retain(|w| w.id != id);
            if state.workflows.len() == before {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }
        self.publish(ConfigChange::Workflows);
        Ok(())
    }

    async fn activate_workflow(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let workflow_type = state
                .workflows
                .iter()
                .find(|w| w.id == id)
                .map(|w| w.workflow_type.clone())
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            let now = Utc::now();
            for workflow in &mut state.workflows {
                if workflow.workflow_type != workflow_type {
                    continue;
                }
                let enable = workflow.id == id;
                if workflow.enabled != enable {
                    workflow.enabled = enable;
                    workflow.updated_at = now;
                }
            }
        }
        self.publish(ConfigChange::Workflows);
        Ok(())
    }

    async fn deactivate_workflow(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            let workflow = state
                .workflows
                .iter_mut()
                .find(|w| w.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            workflow.enabled = false;
            workflow.updated_at = Utc::now();
        }
        self.publish(ConfigChange::Workflows);
        Ok(())
    }
}

#[async_trait]
impl DisplayRuleRepository for MemoryStore {
    async fn list_display_rules(&self) -> Result<Vec<DisplayRule>, StoreError> {
        Ok(self.state.read().await.display_rules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{HookType, NodeType, WorkflowNode};

    fn workflow(id: &str, workflow_type: &str) -> Workflow {
        Workflow::new(id, id, workflow_type)
            .with_node(WorkflowNode::new("s", NodeType::Start))
            .with_node(WorkflowNode::new("b", NodeType::BackendCall))
            .with_node(WorkflowNode::new("e", NodeType::End))
            .with_edge("s", "b")
            .with_edge("b", "e")
    }

    #[tokio::test]
    async fn test_insert_hook_assigns_id_and_publishes() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe();

        let hook = store
            .insert_hook(NewHook::new("audit", HookType::Pre, "log toolName;"))
            .await
            .unwrap();

        assert!(!hook.id.is_empty());
        assert_eq!(changes.recv().await.unwrap(), ConfigChange::Hooks);
        assert_eq!(store.get_hook(&hook.id).await.unwrap().name, "audit");
    }

    #[tokio::test]
    async fn test_update_hook_keeps_created_at() {
        let store = MemoryStore::new();
        let hook = store
            .insert_hook(NewHook::new("a", HookType::Pre, "log 1;"))
            .await
            .unwrap();

        let mut edited = hook.clone();
        edited.script = "log 2;".into();
        edited.created_at = Utc::now() + chrono::Duration::days(1);
        store.update_hook(&edited).await.unwrap();

        let stored = store.get_hook(&hook.id).await.unwrap();
        assert_eq!(stored.script, "log 2;");
        assert_eq!(stored.created_at, hook.created_at);
    }

    #[tokio::test]
    async fn test_delete_unknown_hook_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete_hook("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_activate_workflow_is_exclusive_per_type() {
        let store = MemoryStore::new();
        store.save_workflow(&workflow("w1", "tools/call")).await.unwrap();
        store.save_workflow(&workflow("w2", "tools/call")).await.unwrap();
        store.save_workflow(&workflow("w3", "prompts/get")).await.unwrap();

        store.activate_workflow("w1").await.unwrap();
        store.activate_workflow("w3").await.unwrap();
        store.activate_workflow("w2").await.unwrap();

        let enabled: Vec<String> = store
            .list_workflows()
            .await
            .unwrap()
            .into_iter()
            .filter(|w| w.enabled)
            .map(|w| w.id)
            .collect();
        assert_eq!(enabled, ["w2", "w3"]);
    }

    #[tokio::test]
    async fn test_servers_keep_declaration_order() {
        let store = MemoryStore::new();
        store
            .upsert_server(BackendServer::new_stdio("b", "beta", "beta-server", vec![]))
            .await
            .unwrap();
        store
            .upsert_server(BackendServer::new_stdio("a", "alpha", "alpha-server", vec![]))
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_servers()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[tokio::test]
    async fn test_unknown_token_is_none() {
        let store = MemoryStore::new();
        store.put_token(Token::new("t1", "client-1", vec!["alpha".into()])).await;
        assert!(store.get_token("t1").await.unwrap().is_some());
        assert!(store.get_token("t2").await.unwrap().is_none());
    }
}
