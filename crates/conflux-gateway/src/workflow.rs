//! Workflow DAG execution.
//!
//! A workflow replaces the plain pre/post pipeline for one request type.
//! Workflows are compiled when saved or activated, so a bad script or a
//! malformed graph is rejected there and never found at call time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use conflux_core::ports::{
    GatewayError, GatewayEventEmitter, HookRepository, StoreError, WorkflowRepository,
};
use conflux_core::{
    GatewayEvent, GraphError, InvocationContext, NodeType, RequestType, Workflow, WorkflowNode,
};

use crate::hooks::{HookPipeline, Script, ScriptError};

/// Errors from workflow administration.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Invalid(#[from] GraphError),

    #[error("Hook node '{node}': {error}")]
    Script { node: String, error: ScriptError },

    #[error("Hook node '{node}' references unknown hook '{hook_id}'")]
    UnknownHook { node: String, hook_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
enum StepKind {
    Start,
    Hook { name: String, script: Arc<Script> },
    BackendCall,
    End,
}

#[derive(Debug, Clone)]
struct Step {
    node_id: String,
    node_type: NodeType,
    kind: StepKind,
}

/// A workflow with its nodes in execution order and scripts compiled.
#[derive(Debug, Clone)]
pub struct PreparedWorkflow {
    pub workflow: Workflow,
    steps: Vec<Step>,
}

impl PreparedWorkflow {
    /// Node ids in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.node_id.as_str()).collect()
    }
}

/// What happened at one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum NodeStatus {
    Ok,
    Blocked(String),
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub node_type: NodeType,
    #[serde(flatten)]
    pub status: NodeStatus,
    pub finished_at: DateTime<Utc>,
}

/// Result of executing a workflow for one invocation.
#[derive(Debug)]
pub struct WorkflowRun {
    pub context: InvocationContext,
    pub nodes: Vec<NodeResult>,
    /// Result of the last backend-call node that ran.
    pub backend_result: Option<Result<Value, GatewayError>>,
    /// Set by the first hook node that blocked.
    pub blocked: Option<GatewayError>,
}

impl WorkflowRun {
    /// Collapse the run into what the caller sees.
    ///
    /// A backend error wins over everything, then a block. Otherwise the
    /// (possibly hook-rewritten) response is returned.
    pub fn into_result(self) -> (InvocationContext, Result<Value, GatewayError>) {
        let result = match (self.backend_result, self.blocked) {
            (Some(Err(e)), _) => Err(e),
            (_, Some(blocked)) => Err(blocked),
            (Some(Ok(value)), None) => Ok(self.context.response.clone().unwrap_or(value)),
            (None, None) => Err(GatewayError::Internal(
                "workflow finished without a backend call".to_string(),
            )),
        };
        (self.context, result)
    }
}

/// Validates, activates and executes workflows.
pub struct WorkflowEngine {
    repo: Arc<dyn WorkflowRepository>,
    hooks: Arc<dyn HookRepository>,
    pipeline: Arc<HookPipeline>,
    active: RwLock<HashMap<String, Arc<PreparedWorkflow>>>,
    emitter: Arc<dyn GatewayEventEmitter>,
}

impl WorkflowEngine {
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        hooks: Arc<dyn HookRepository>,
        pipeline: Arc<HookPipeline>,
        emitter: Arc<dyn GatewayEventEmitter>,
    ) -> Self {
        Self {
            repo,
            hooks,
            pipeline,
            active: RwLock::new(HashMap::new()),
            emitter,
        }
    }

    /// True iff start, backend-call and end nodes exist and are connected.
    pub fn validate(workflow: &Workflow) -> bool {
        workflow.is_valid()
    }

    async fn compile_node(&self, node: &WorkflowNode) -> Result<StepKind, WorkflowError> {
        Ok(match node.node_type {
            NodeType::Start => StepKind::Start,
            NodeType::End => StepKind::End,
            NodeType::BackendCall => StepKind::BackendCall,
            NodeType::Hook => {
                let (name, source) = if let Some(source) = &node.data.script {
                    let name = node.data.label.clone().unwrap_or_else(|| node.id.clone());
                    (name, source.clone())
                } else {
                    let hook_id = node.data.hook_id.clone().unwrap_or_default();
                    match self.hooks.get_hook(&hook_id).await {
                        Ok(hook) => (hook.name, hook.script),
                        Err(StoreError::NotFound(_)) => {
                            return Err(WorkflowError::UnknownHook {
                                node: node.id.clone(),
                                hook_id,
                            });
                        }
                        Err(e) => return Err(e.into()),
                    }
                };
                let script = Script::compile(&source).map_err(|error| WorkflowError::Script {
                    node: node.id.clone(),
                    error,
                })?;
                StepKind::Hook {
                    name,
                    script: Arc::new(script),
                }
            }
        })
    }

    /// Order nodes and compile every hook node.
    pub async fn prepare(&self, workflow: &Workflow) -> Result<PreparedWorkflow, WorkflowError> {
        let order = workflow.topological_order()?;
        let mut steps = Vec::with_capacity(order.len());
        for node in order {
            steps.push(Step {
                node_id: node.id.clone(),
                node_type: node.node_type,
                kind: self.compile_node(node).await?,
            });
        }
        Ok(PreparedWorkflow {
            workflow: workflow.clone(),
            steps,
        })
    }

    pub async fn list(&self) -> Result<Vec<Workflow>, StoreError> {
        self.repo.list_workflows().await
    }

    pub async fn get(&self, id: &str) -> Result<Workflow, StoreError> {
        self.repo.get_workflow(id).await
    }

    /// Check and persist a workflow.
    ///
    /// The enabled flag is owned by [`Self::activate`]: a new workflow is
    /// saved disabled and an active one stays active, which then requires
    /// the edited graph to still pass activation checks.
    pub async fn save(&self, mut workflow: Workflow) -> Result<Workflow, WorkflowError> {
        workflow.check_structure()?;
        self.prepare(&workflow).await?;

        workflow.enabled = match self.repo.get_workflow(&workflow.id).await {
            Ok(existing) => {
                workflow.created_at = existing.created_at;
                existing.enabled
            }
            Err(StoreError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        if workflow.enabled {
            workflow.activation_check()?;
        }
        workflow.updated_at = Utc::now();

        self.repo.save_workflow(&workflow).await?;
        tracing::info!(workflow_id = %workflow.id, workflow = %workflow.name, "Workflow saved");
        if workflow.enabled {
            self.reload().await?;
        }
        Ok(workflow)
    }

    /// Make `id` the active workflow for its type.
    ///
    /// Any other enabled workflow of the same type is disabled in the
    /// same store write.
    pub async fn activate(&self, id: &str) -> Result<(), WorkflowError> {
        let workflow = self.repo.get_workflow(id).await?;
        workflow.activation_check()?;
        self.prepare(&workflow).await?;

        self.repo.activate_workflow(id).await?;
        self.reload().await?;

        tracing::info!(workflow_id = %id, workflow_type = %workflow.workflow_type, "Workflow activated");
        self.emitter.emit(GatewayEvent::WorkflowActivated {
            workflow_id: workflow.id,
            workflow_type: workflow.workflow_type,
        });
        Ok(())
    }

    pub async fn deactivate(&self, id: &str) -> Result<(), WorkflowError> {
        self.repo.deactivate_workflow(id).await?;
        self.reload().await?;
        tracing::info!(workflow_id = %id, "Workflow deactivated");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), WorkflowError> {
        self.repo.delete_workflow(id).await?;
        self.reload().await?;
        tracing::info!(workflow_id = %id, "Workflow deleted");
        Ok(())
    }

    /// Rebuild the active set from storage. Returns how many are active.
    ///
    /// An enabled workflow that no longer compiles (say, a referenced hook
    /// was deleted) is skipped with a warning.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let mut active = HashMap::new();
        for workflow in self.repo.list_workflows().await? {
            if !workflow.enabled {
                continue;
            }
            match self.prepare(&workflow).await {
                Ok(prepared) => {
                    active.insert(workflow.workflow_type.clone(), Arc::new(prepared));
                }
                Err(e) => {
                    tracing::warn!(workflow_id = %workflow.id, error = %e, "Skipping enabled workflow");
                }
            }
        }
        let count = active.len();
        *self.active.write().await = active;
        tracing::debug!(count, "Workflows reloaded");
        Ok(count)
    }

    /// The active workflow handling `request_type`, if any.
    pub async fn active_for(&self, request_type: RequestType) -> Option<Arc<PreparedWorkflow>> {
        self.active.read().await.get(request_type.as_str()).cloned()
    }

    /// Run `prepared` for one invocation.
    ///
    /// `backend` performs the real backend call with the context as it
    /// stands when the backend-call node is reached.
    pub async fn execute<'a, F>(
        &self,
        prepared: &PreparedWorkflow,
        context: InvocationContext,
        mut backend: F,
    ) -> WorkflowRun
    where
        F: FnMut(InvocationContext) -> BoxFuture<'a, Result<Value, GatewayError>>,
    {
        let mut run = WorkflowRun {
            context,
            nodes: Vec::with_capacity(prepared.steps.len()),
            backend_result: None,
            blocked: None,
        };

        for step in &prepared.steps {
            let status = match &step.kind {
                StepKind::Start | StepKind::End => NodeStatus::Ok,
                StepKind::Hook { name, script } => {
                    match self
                        .pipeline
                        .run_script(name, script.clone(), &run.context)
                        .await
                    {
                        Ok(outcome) => {
                            run.context = outcome.context;
                            match outcome.blocked {
                                Some(reason) => {
                                    if run.blocked.is_none() {
                                        run.blocked =
                                            Some(GatewayError::hook_blocked(name, reason.clone()));
                                    }
                                    NodeStatus::Blocked(reason)
                                }
                                None => NodeStatus::Ok,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                workflow_id = %prepared.workflow.id,
                                node = %step.node_id,
                                error = %e,
                                "Workflow hook node failed"
                            );
                            NodeStatus::Failed(e.to_string())
                        }
                    }
                }
                StepKind::BackendCall if run.blocked.is_some() => NodeStatus::Skipped,
                StepKind::BackendCall => {
                    let result = backend(run.context.clone()).await;
                    let status = match &result {
                        Ok(value) => {
                            run.context.response = Some(value.clone());
                            run.context.error = None;
                            NodeStatus::Ok
                        }
                        Err(e) => {
                            run.context.error = Some(e.to_string());
                            NodeStatus::Failed(e.to_string())
                        }
                    };
                    run.backend_result = Some(result);
                    status
                }
            };

            run.nodes.push(NodeResult {
                node_id: step.node_id.clone(),
                node_type: step.node_type,
                status,
                finished_at: Utc::now(),
            });
        }

        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Sandbox;
    use crate::testing::RecordingEmitter;
    use conflux_core::ports::BackendError;
    use conflux_core::{HookType, NewHook};
    use conflux_store::MemoryStore;
    use futures_util::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        engine: WorkflowEngine,
        emitter: Arc<RecordingEmitter>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let pipeline = Arc::new(HookPipeline::new(
            store.clone(),
            Sandbox::new(Duration::from_secs(5), 10_000),
            emitter.clone(),
        ));
        let engine = WorkflowEngine::new(store.clone(), store.clone(), pipeline, emitter.clone());
        Harness {
            store,
            engine,
            emitter,
        }
    }

    fn with_hooks(id: &str, pre: &str, post: &str) -> Workflow {
        Workflow::new(id, id, "tools/call")
            .with_node(WorkflowNode::new("start", NodeType::Start))
            .with_node(WorkflowNode::inline_hook("pre", pre))
            .with_node(WorkflowNode::new("call", NodeType::BackendCall))
            .with_node(WorkflowNode::inline_hook("post", post))
            .with_node(WorkflowNode::new("end", NodeType::End))
            .with_edge("start", "pre")
            .with_edge("pre", "call")
            .with_edge("call", "post")
            .with_edge("post", "end")
    }

    fn context() -> InvocationContext {
        InvocationContext::new(
            RequestType::ToolsCall,
            "alpha",
            "alpha",
            "client-1",
            "search",
            json!({"query": "rust"}),
            json!({}),
        )
    }

    #[tokio::test]
    async fn test_validate_rejects_missing_end_and_unreachable_call() {
        let no_end = Workflow::new("a", "a", "tools/call")
            .with_node(WorkflowNode::new("s", NodeType::Start))
            .with_node(WorkflowNode::new("b", NodeType::BackendCall))
            .with_edge("s", "b");
        assert!(!WorkflowEngine::validate(&no_end));

        let unreachable = Workflow::new("b", "b", "tools/call")
            .with_node(WorkflowNode::new("s", NodeType::Start))
            .with_node(WorkflowNode::new("b", NodeType::BackendCall))
            .with_node(WorkflowNode::new("e", NodeType::End))
            .with_edge("b", "e");
        assert!(!WorkflowEngine::validate(&unreachable));

        let h = harness();
        h.engine.save(unreachable).await.unwrap();
        let err = h.engine.activate("b").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Invalid(GraphError::Unreachable { .. })));
        assert!(!h.engine.get("b").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_activation_is_exclusive_per_type() {
        let h = harness();
        h.engine.save(with_hooks("w1", "log 1;", "log 2;")).await.unwrap();
        h.engine.save(with_hooks("w2", "log 1;", "log 2;")).await.unwrap();

        h.engine.activate("w1").await.unwrap();
        h.engine.activate("w2").await.unwrap();

        assert!(!h.engine.get("w1").await.unwrap().enabled);
        assert!(h.engine.get("w2").await.unwrap().enabled);
        let active = h.engine.active_for(RequestType::ToolsCall).await.unwrap();
        assert_eq!(active.workflow.id, "w2");
        assert!(h.engine.active_for(RequestType::PromptsGet).await.is_none());
        assert_eq!(
            h.emitter.events().last(),
            Some(&GatewayEvent::WorkflowActivated {
                workflow_id: "w2".into(),
                workflow_type: "tools/call".into()
            })
        );
    }

    #[tokio::test]
    async fn test_save_rejects_bad_script_and_cycles() {
        let h = harness();
        let err = h
            .engine
            .save(with_hooks("w", "set toolName = 1;", "log 1;"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Script { ref node, .. } if node == "pre"));

        let cyclic = with_hooks("c", "log 1;", "log 2;").with_edge("end", "start");
        assert!(matches!(
            h.engine.save(cyclic).await.unwrap_err(),
            WorkflowError::Invalid(GraphError::Cycle)
        ));
        assert!(h.engine.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hook_reference_must_exist() {
        let h = harness();
        let wf = Workflow::new("w", "w", "tools/call")
            .with_node(WorkflowNode::new("s", NodeType::Start))
            .with_node(WorkflowNode::hook_ref("h", "missing"));
        assert!(matches!(
            h.engine.save(wf).await.unwrap_err(),
            WorkflowError::UnknownHook { .. }
        ));
    }

    #[tokio::test]
    async fn test_execute_threads_context_through_nodes() {
        let h = harness();
        let stored = HookPipeline::new(
            h.store.clone(),
            Sandbox::new(Duration::from_secs(5), 100),
            h.emitter.clone(),
        )
        .create_hook(NewHook::new("tag", HookType::Pre, "set metadata.tagged = true;"))
        .await
        .unwrap();

        let wf = with_hooks(
            "w",
            "set arguments.limit = 5;",
            "set response.note = \"post saw \" + arguments.limit;",
        )
        .with_node(WorkflowNode::hook_ref("tag", stored.id))
        .with_edge("start", "tag");
        let prepared = h.engine.prepare(&wf).await.unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Value::Null));
        let seen_in_call = seen.clone();
        let run = h
            .engine
            .execute(&prepared, context(), move |ctx| {
                *seen_in_call.lock().unwrap() = ctx.arguments.clone();
                async { Ok::<_, GatewayError>(json!({"content": []})) }.boxed()
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), json!({"query": "rust", "limit": 5}));
        assert!(run.nodes.iter().all(|n| n.status == NodeStatus::Ok));
        assert_eq!(run.context.metadata["tagged"], true);
        let (_, result) = run.into_result();
        assert_eq!(result.unwrap(), json!({"content": [], "note": "post saw 5"}));
    }

    #[tokio::test]
    async fn test_block_skips_backend_call() {
        let h = harness();
        let prepared = h
            .engine
            .prepare(&with_hooks("w", "block \"nope\";", "log 1;"))
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let run = h
            .engine
            .execute(&prepared, context(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, GatewayError>(Value::Null) }.boxed()
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let statuses: Vec<_> = run.nodes.iter().map(|n| n.status.clone()).collect();
        assert_eq!(
            statuses,
            [
                NodeStatus::Ok,
                NodeStatus::Blocked("nope".into()),
                NodeStatus::Skipped,
                NodeStatus::Ok,
                NodeStatus::Ok,
            ]
        );
        assert_eq!(
            run.into_result().1.unwrap_err(),
            GatewayError::hook_blocked("pre", "nope")
        );
    }

    #[tokio::test]
    async fn test_hook_failure_is_recorded_and_execution_continues() {
        let h = harness();
        let prepared = h
            .engine
            .prepare(&with_hooks("w", "if arguments.query > 1 { log 1; }", "log 1;"))
            .await
            .unwrap();

        let run = h
            .engine
            .execute(&prepared, context(), |_| async { Ok::<_, GatewayError>(json!("done")) }.boxed())
            .await;

        assert!(matches!(run.nodes[1].status, NodeStatus::Failed(_)));
        assert_eq!(run.nodes[2].status, NodeStatus::Ok);
        assert_eq!(run.into_result().1.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn test_backend_error_returned_verbatim_after_remaining_nodes() {
        let h = harness();
        let prepared = h
            .engine
            .prepare(&with_hooks("w", "log 1;", "set metadata.post_ran = true;"))
            .await
            .unwrap();
        let backend_error = BackendError::new(-32050, "quota exceeded");
        let expected = backend_error.clone();

        let run = h
            .engine
            .execute(&prepared, context(), move |_| {
                let e = backend_error.clone();
                async move { Err::<Value, _>(GatewayError::Backend(e)) }.boxed()
            })
            .await;

        assert_eq!(run.nodes.len(), 5);
        assert_eq!(run.context.metadata["post_ran"], true);
        assert_eq!(run.into_result().1.unwrap_err(), GatewayError::Backend(expected));
    }
}
