//! Ordered pre/post interception around backend calls.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use conflux_core::ports::{GatewayError, GatewayEventEmitter, HookRepository, StoreError};
use conflux_core::{GatewayEvent, Hook, HookPhase, HookType, InvocationContext, NewHook, sort_hooks};

use super::sandbox::{Sandbox, ScriptOutcome};
use super::script::{Script, ScriptError};

/// Errors from hook administration.
#[derive(Debug, Error)]
pub enum HookAdminError {
    #[error("Invalid hook script: {0}")]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An enabled hook with its compiled script.
#[derive(Debug, Clone)]
pub struct CompiledHook {
    pub id: String,
    pub name: String,
    pub hook_type: HookType,
    pub script: Arc<Script>,
}

/// Result of running one phase.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    /// False when a hook blocked, threw or timed out.
    pub proceed: bool,
    /// Context after every hook that ran.
    pub context: InvocationContext,
    /// `HookBlocked` naming the hook that stopped the phase.
    pub error: Option<GatewayError>,
}

impl PhaseOutcome {
    fn blocked(context: InvocationContext, hook: &str, reason: impl Into<String>) -> Self {
        Self {
            proceed: false,
            context,
            error: Some(GatewayError::hook_blocked(hook, reason)),
        }
    }
}

/// Runs enabled hooks in execution order.
///
/// The hook list is a snapshot swapped in by [`HookPipeline::reload`];
/// phases already running keep the snapshot they started with.
pub struct HookPipeline {
    repo: Arc<dyn HookRepository>,
    hooks: RwLock<Arc<Vec<CompiledHook>>>,
    sandbox: Sandbox,
    emitter: Arc<dyn GatewayEventEmitter>,
}

impl HookPipeline {
    pub fn new(
        repo: Arc<dyn HookRepository>,
        sandbox: Sandbox,
        emitter: Arc<dyn GatewayEventEmitter>,
    ) -> Self {
        Self {
            repo,
            hooks: RwLock::new(Arc::new(Vec::new())),
            sandbox,
            emitter,
        }
    }

    /// Rebuild the in-memory list from storage.
    ///
    /// Hooks whose stored script no longer compiles are skipped with a
    /// warning. Returns the number of hooks loaded.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let mut hooks = self.repo.list_hooks().await?;
        hooks.retain(|h| h.enabled);
        sort_hooks(&mut hooks);

        let compiled: Vec<CompiledHook> = hooks
            .into_iter()
            .filter_map(|hook| match Script::compile(&hook.script) {
                Ok(script) => Some(CompiledHook {
                    id: hook.id,
                    name: hook.name,
                    hook_type: hook.hook_type,
                    script: Arc::new(script),
                }),
                Err(e) => {
                    tracing::warn!(hook_id = %hook.id, hook = %hook.name, error = %e, "Skipping hook with invalid script");
                    None
                }
            })
            .collect();

        let count = compiled.len();
        *self.hooks.write().await = Arc::new(compiled);
        tracing::info!(count, "Hooks reloaded");
        self.emitter.emit(GatewayEvent::HooksReloaded { count });
        Ok(count)
    }

    /// Current hook snapshot in execution order.
    pub async fn loaded(&self) -> Arc<Vec<CompiledHook>> {
        self.hooks.read().await.clone()
    }

    /// Run every hook of `phase` serially.
    ///
    /// The first hook that blocks, throws or times out stops the phase.
    pub async fn run_phase(&self, phase: HookPhase, context: InvocationContext) -> PhaseOutcome {
        let hooks = self.loaded().await;
        let mut context = context;

        for hook in hooks.iter().filter(|h| h.hook_type.runs_in(phase)) {
            match self.run_script(&hook.name, hook.script.clone(), &context).await {
                Ok(ScriptOutcome {
                    context: next,
                    blocked,
                }) => {
                    context = next;
                    if let Some(reason) = blocked {
                        tracing::info!(hook = %hook.name, ?phase, tool = %context.tool_name, %reason, "Hook blocked call");
                        return PhaseOutcome::blocked(context, &hook.name, reason);
                    }
                }
                Err(e) => {
                    tracing::warn!(hook = %hook.name, ?phase, error = %e, "Hook failed, blocking call");
                    return PhaseOutcome::blocked(context, &hook.name, e.to_string());
                }
            }
        }

        PhaseOutcome {
            proceed: true,
            context,
            error: None,
        }
    }

    /// Run one script under the pipeline's sandbox limits.
    pub async fn run_script(
        &self,
        name: &str,
        script: Arc<Script>,
        context: &InvocationContext,
    ) -> Result<ScriptOutcome, ScriptError> {
        tracing::debug!(hook = %name, tool = %context.tool_name, "Running hook script");
        self.sandbox.run(name, script, context).await
    }

    pub async fn list_hooks(&self) -> Result<Vec<Hook>, StoreError> {
        let mut hooks = self.repo.list_hooks().await?;
        sort_hooks(&mut hooks);
        Ok(hooks)
    }

    /// Compile, persist and load a new hook.
    pub async fn create_hook(&self, hook: NewHook) -> Result<Hook, HookAdminError> {
        Script::compile(&hook.script)?;
        let created = self.repo.insert_hook(hook).await?;
        tracing::info!(hook_id = %created.id, hook = %created.name, "Hook created");
        self.reload().await?;
        Ok(created)
    }

    /// Compile and replace an existing hook.
    pub async fn update_hook(&self, hook: &Hook) -> Result<(), HookAdminError> {
        Script::compile(&hook.script)?;
        self.repo.update_hook(hook).await?;
        tracing::info!(hook_id = %hook.id, hook = %hook.name, "Hook updated");
        self.reload().await?;
        Ok(())
    }

    pub async fn delete_hook(&self, id: &str) -> Result<(), HookAdminError> {
        self.repo.delete_hook(id).await?;
        tracing::info!(hook_id = %id, "Hook deleted");
        self.reload().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingEmitter;
    use conflux_core::RequestType;
    use conflux_store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn pipeline(store: Arc<MemoryStore>) -> (HookPipeline, Arc<RecordingEmitter>) {
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline = HookPipeline::new(
            store,
            Sandbox::new(Duration::from_secs(5), 10_000),
            emitter.clone(),
        );
        (pipeline, emitter)
    }

    fn context(tool: &str) -> InvocationContext {
        InvocationContext::new(
            RequestType::ToolsCall,
            "alpha",
            "alpha",
            "client-1",
            tool,
            json!({}),
            json!({ "name": tool }),
        )
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_veto_stops_later_ones() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(store);
        // Insert out of order to check sorting.
        for (order, script) in [
            (2, "set metadata.trail = metadata.trail + \"2\";"),
            (0, "set metadata.trail = \"0\";"),
            (1, "set metadata.trail = metadata.trail + \"1\"; block \"stop at 1\";"),
        ] {
            pipeline
                .create_hook(NewHook::new(format!("h{order}"), HookType::Pre, script).with_order(order))
                .await
                .unwrap();
        }

        let outcome = pipeline.run_phase(HookPhase::Pre, context("search")).await;
        assert!(!outcome.proceed);
        assert_eq!(outcome.context.metadata["trail"], "01");
        assert_eq!(
            outcome.error,
            Some(GatewayError::hook_blocked("h1", "stop at 1"))
        );
    }

    #[tokio::test]
    async fn test_phase_filters_hook_type() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(store);
        pipeline
            .create_hook(NewHook::new("pre-only", HookType::Pre, "block;"))
            .await
            .unwrap();
        pipeline
            .create_hook(NewHook::new("both", HookType::Both, "set metadata.seen = true;"))
            .await
            .unwrap();

        let outcome = pipeline.run_phase(HookPhase::Post, context("search")).await;
        assert!(outcome.proceed);
        assert_eq!(outcome.context.metadata["seen"], true);
    }

    #[tokio::test]
    async fn test_disabled_hooks_are_not_loaded() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, emitter) = pipeline(store);
        let mut hook = pipeline
            .create_hook(NewHook::new("off", HookType::Pre, "block;"))
            .await
            .unwrap();
        hook.enabled = false;
        pipeline.update_hook(&hook).await.unwrap();

        assert!(pipeline.loaded().await.is_empty());
        assert!(pipeline.run_phase(HookPhase::Pre, context("x")).await.proceed);
        assert_eq!(
            emitter.events().last(),
            Some(&GatewayEvent::HooksReloaded { count: 0 })
        );
    }

    #[tokio::test]
    async fn test_invalid_script_rejected_before_persisting() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(store);
        let err = pipeline
            .create_hook(NewHook::new("bad", HookType::Pre, "block \"unterminated;"))
            .await
            .unwrap_err();
        assert!(matches!(err, HookAdminError::Script(ScriptError::Syntax { .. })));
        assert!(pipeline.list_hooks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_error_blocks_with_message() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(store);
        pipeline
            .create_hook(NewHook::new("strict", HookType::Pre, "if toolName > 1 { log 1; }"))
            .await
            .unwrap();

        let outcome = pipeline.run_phase(HookPhase::Pre, context("x")).await;
        assert!(!outcome.proceed);
        let Some(GatewayError::HookBlocked { hook, reason }) = outcome.error else {
            panic!("expected HookBlocked");
        };
        assert_eq!(hook, "strict");
        assert!(reason.contains("cannot order"));
    }

    #[tokio::test]
    async fn test_timeout_blocks() {
        let store = Arc::new(MemoryStore::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline = HookPipeline::new(store, Sandbox::new(Duration::ZERO, 10_000), emitter);
        pipeline
            .create_hook(NewHook::new("slow", HookType::Pre, "log toolName;"))
            .await
            .unwrap();

        let outcome = pipeline.run_phase(HookPhase::Pre, context("x")).await;
        assert!(!outcome.proceed);
        assert!(matches!(
            outcome.error,
            Some(GatewayError::HookBlocked { reason, .. }) if reason.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn test_delete_reloads() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(store);
        let hook = pipeline
            .create_hook(NewHook::new("h", HookType::Pre, "block;"))
            .await
            .unwrap();
        assert_eq!(pipeline.loaded().await.len(), 1);

        pipeline.delete_hook(&hook.id).await.unwrap();
        assert!(pipeline.loaded().await.is_empty());
    }
}
