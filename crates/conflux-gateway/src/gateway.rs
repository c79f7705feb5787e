//! The aggregation gateway.
//!
//! Presents every running backend as one capability server: discovery
//! fans out to all backends and merges the results, invocations are
//! routed back to the owning backend through access checks, hooks (or
//! the active workflow) and the audit log.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use conflux_core::ports::{
    BackendConnection, BackendError, BackendServerRepository, ConfigChange,
    ConfigChangeSource, ConnectionFactory, DisplayRuleRepository, GatewayError,
    GatewayEventEmitter, StoreError, Stores,
};
use conflux_core::{
    AuditEntry, CapabilityKind, DisplayRule, HookPhase, InvocationContext, PromptRecord,
    RequestType, ResourceRecord, ResourceTemplateRecord, ToolRecord,
};

use crate::access::{AccessController, Principal};
use crate::audit::{AuditLog, AuditTrace};
use crate::config::GatewayConfig;
use crate::hooks::{HookPipeline, Sandbox};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, McpRequest, extract_token};
use crate::registry::{BackendInfo, ConnectionRegistry, LiveConnection, RegistryError};
use crate::routing::{NamespaceMap, NamespaceTable, RESOURCE_SCHEME, Route, RouteTable};
use crate::workflow::WorkflowEngine;

/// What a routed invocation asks of its backend.
enum Target<'t> {
    Tool(&'t str),
    Prompt(&'t str),
    /// A namespaced URI and its candidate backend URIs, tried in order.
    Resource {
        uri: &'t str,
        candidates: &'t [String],
    },
}

impl Target<'_> {
    const fn request_type(&self) -> RequestType {
        match self {
            Self::Tool(_) => RequestType::ToolsCall,
            Self::Prompt(_) => RequestType::PromptsGet,
            Self::Resource { .. } => RequestType::ResourcesRead,
        }
    }
}

struct Invocation<'t> {
    server_id: &'t str,
    target: Target<'t>,
    /// Name or URI as the client sent it.
    client_name: &'t str,
    arguments: Value,
    request: Value,
}

/// Whether a read result carries anything.
fn has_contents(value: &Value) -> bool {
    match value.get("contents") {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
        None => !value.is_null(),
    }
}

fn stopped_phase(error: Option<GatewayError>) -> GatewayError {
    error.unwrap_or_else(|| GatewayError::Internal("hook phase stopped without a reason".into()))
}

async fn timed<F>(deadline: Duration, what: &str, call: F) -> Result<Value, GatewayError>
where
    F: Future<Output = Result<Value, BackendError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| GatewayError::Timeout(format!("{what} did not answer within {deadline:?}")))?
        .map_err(GatewayError::Backend)
}

/// One capability server in front of many backends.
pub struct AggregationGateway {
    config: GatewayConfig,
    registry: Arc<ConnectionRegistry>,
    access: AccessController,
    audit: AuditLog,
    hooks: Arc<HookPipeline>,
    workflows: Arc<WorkflowEngine>,
    servers: Arc<dyn BackendServerRepository>,
    display_rule_repo: Arc<dyn DisplayRuleRepository>,
    changes: Arc<dyn ConfigChangeSource>,
    display_rules: RwLock<Arc<Vec<DisplayRule>>>,
    tools: RouteTable,
    prompts: RouteTable,
    namespaces: NamespaceTable,
}

impl AggregationGateway {
    /// Wire the gateway services over one set of stores.
    pub fn new(
        config: GatewayConfig,
        stores: Stores,
        factory: Arc<dyn ConnectionFactory>,
        emitter: Arc<dyn GatewayEventEmitter>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            factory,
            emitter.clone(),
            config.startup_timeout,
        ));
        let hooks = Arc::new(HookPipeline::new(
            stores.hooks.clone(),
            Sandbox::new(config.hook_timeout, config.script_step_limit),
            emitter.clone(),
        ));
        let workflows = Arc::new(WorkflowEngine::new(
            stores.workflows.clone(),
            stores.hooks.clone(),
            hooks.clone(),
            emitter,
        ));

        Self {
            access: AccessController::new(stores.tokens.clone(), config.require_auth),
            audit: AuditLog::new(stores.audit),
            registry,
            hooks,
            workflows,
            servers: stores.servers,
            display_rule_repo: stores.display_rules,
            changes: stores.changes,
            display_rules: RwLock::new(Arc::new(Vec::new())),
            tools: RouteTable::new(),
            prompts: RouteTable::new(),
            namespaces: NamespaceTable::new(),
            config,
        }
    }

    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub const fn hooks(&self) -> &Arc<HookPipeline> {
        &self.hooks
    }

    pub const fn workflows(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load configuration from the stores and start auto-start backends.
    ///
    /// Backends that fail to start are logged and left stopped.
    pub async fn init(&self) -> Result<(), StoreError> {
        let added = self.reload_all().await?;
        self.auto_start(&added).await;
        tracing::info!(
            backends = self.registry.list().await.len(),
            "Gateway initialized"
        );
        Ok(())
    }

    /// Reconcile servers, hooks, workflows and display rules with the
    /// stores. Returns the ids of newly added backends.
    pub async fn reload_all(&self) -> Result<Vec<String>, StoreError> {
        let added = self.sync_servers().await?;
        self.hooks.reload().await?;
        self.workflows.reload().await?;
        self.reload_display_rules().await?;
        Ok(added)
    }

    /// Reconcile the registry with the stored server configs and start
    /// newly added auto-start backends. Returns the added ids.
    pub async fn sync_backends(&self) -> Result<Vec<String>, StoreError> {
        let added = self.sync_servers().await?;
        self.auto_start(&added).await;
        Ok(added)
    }

    async fn sync_servers(&self) -> Result<Vec<String>, StoreError> {
        let servers = self.servers.list_servers().await?;
        Ok(self.registry.sync(servers).await)
    }

    pub async fn reload_display_rules(&self) -> Result<usize, StoreError> {
        let rules = self.display_rule_repo.list_display_rules().await?;
        let count = rules.len();
        *self.display_rules.write().await = Arc::new(rules);
        tracing::debug!(count, "Display rules reloaded");
        Ok(count)
    }

    async fn auto_start(&self, ids: &[String]) {
        let mut wanted = Vec::new();
        for id in ids {
            if let Ok(info) = self.registry.get(id).await {
                if info.enabled && info.auto_start {
                    wanted.push(info.id);
                }
            }
        }

        let starts = wanted.iter().map(|id| async move {
            if let Err(e) = self.registry.start(id).await {
                tracing::warn!(server_id = %id, error = %e, "Auto-start failed");
            }
        });
        join_all(starts).await;
    }

    /// Follow configuration changes until the store goes away or the
    /// gateway is dropped.
    pub fn spawn_change_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.changes.subscribe();
        let gateway: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let received = changes.recv().await;
                let Some(gateway) = gateway.upgrade() else {
                    break;
                };
                let outcome = match received {
                    Ok(change) => gateway.apply_change(change).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Change feed lagged, reloading everything");
                        match gateway.reload_all().await {
                            Ok(added) => {
                                gateway.auto_start(&added).await;
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, "Failed to apply configuration change");
                }
            }
            tracing::debug!("Change listener stopped");
        })
    }

    async fn apply_change(&self, change: ConfigChange) -> Result<(), StoreError> {
        tracing::debug!(?change, "Applying configuration change");
        match change {
            ConfigChange::Servers => {
                self.sync_backends().await?;
            }
            // Tokens are read on every check.
            ConfigChange::Tokens => {}
            ConfigChange::Hooks => {
                self.hooks.reload().await?;
                // Workflows may reference stored hooks.
                self.workflows.reload().await?;
            }
            ConfigChange::Workflows => {
                self.workflows.reload().await?;
            }
            ConfigChange::DisplayRules => {
                self.reload_display_rules().await?;
            }
        }
        Ok(())
    }

    /// Stop every running backend.
    pub async fn shutdown(&self) {
        self.registry.stop_all().await;
        tracing::info!("Gateway stopped");
    }

    // =========================================================================
    // Backend administration
    // =========================================================================

    pub async fn list_backends(&self) -> Vec<BackendInfo> {
        self.registry.list().await
    }

    pub async fn backend_status(&self, id: &str) -> Result<BackendInfo, RegistryError> {
        self.registry.get(id).await
    }

    pub async fn start_backend(&self, id: &str) -> Result<BackendInfo, RegistryError> {
        self.registry.start(id).await
    }

    pub async fn stop_backend(&self, id: &str) -> Result<BackendInfo, RegistryError> {
        self.registry.stop(id).await
    }

    pub async fn recent_audit(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit).await
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Running backends a discovery pass should visit. `None` visits all.
    async fn visible(&self, principal: Option<&Principal>) -> Vec<LiveConnection> {
        let mut live = self.registry.all_live().await;
        if let Some(principal) = principal {
            live.retain(|c| principal.allows(&c.server_id));
        }
        live
    }

    /// Ask every backend in `live` for one capability list.
    ///
    /// Backends that fail or miss the discovery deadline are left out.
    async fn fan_out<'l, T, F>(
        &self,
        live: &'l [LiveConnection],
        kind: CapabilityKind,
        list: F,
    ) -> Vec<(&'l LiveConnection, Vec<T>)>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn BackendConnection>) -> BoxFuture<'static, Result<Vec<T>, BackendError>>,
    {
        let deadline = self.config.discovery_timeout;
        let passes = live.iter().map(|conn| {
            let call = list(conn.connection.clone());
            async move {
                match tokio::time::timeout(deadline, call).await {
                    Ok(Ok(items)) => Some(items),
                    Ok(Err(e)) => {
                        tracing::warn!(server_id = %conn.server_id, ?kind, error = %e, "Backend listing failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(server_id = %conn.server_id, ?kind, ?deadline, "Backend listing timed out");
                        None
                    }
                }
            }
        });
        let results = join_all(passes).await;

        live.iter()
            .zip(results)
            .filter_map(|(conn, items)| items.map(|items| (conn, items)))
            .collect()
    }

    async fn rules(&self) -> Arc<Vec<DisplayRule>> {
        self.display_rules.read().await.clone()
    }

    async fn discover_tools(&self, principal: Option<&Principal>) -> Vec<ToolRecord> {
        let live = self.visible(principal).await;
        let listed = self
            .fan_out(&live, CapabilityKind::Tool, |c| {
                async move { c.list_tools().await }.boxed()
            })
            .await;
        let rules = self.rules().await;

        let mut routes = HashMap::new();
        let mut tools = Vec::new();
        for (conn, items) in listed {
            for mut tool in items {
                let original_name = tool.name.clone();
                if let Some(rule) = rules
                    .iter()
                    .find(|r| r.matches(&conn.server_id, CapabilityKind::Tool, &original_name))
                {
                    rule.apply_to_tool(&mut tool);
                }
                RouteTable::insert(
                    &mut routes,
                    tool.name.clone(),
                    Route {
                        server_id: conn.server_id.clone(),
                        original_name,
                    },
                );
                tools.push(tool);
            }
        }

        self.tools.replace(routes).await;
        tracing::debug!(count = tools.len(), backends = live.len(), "Tools discovered");
        tools
    }

    async fn discover_prompts(&self, principal: Option<&Principal>) -> Vec<PromptRecord> {
        let live = self.visible(principal).await;
        let listed = self
            .fan_out(&live, CapabilityKind::Prompt, |c| {
                async move { c.list_prompts().await }.boxed()
            })
            .await;
        let rules = self.rules().await;

        let mut routes = HashMap::new();
        let mut prompts = Vec::new();
        for (conn, items) in listed {
            for mut prompt in items {
                let original_name = prompt.name.clone();
                if let Some(rule) = rules
                    .iter()
                    .find(|r| r.matches(&conn.server_id, CapabilityKind::Prompt, &original_name))
                {
                    rule.apply_to_prompt(&mut prompt);
                }
                RouteTable::insert(
                    &mut routes,
                    prompt.name.clone(),
                    Route {
                        server_id: conn.server_id.clone(),
                        original_name,
                    },
                );
                prompts.push(prompt);
            }
        }

        self.prompts.replace(routes).await;
        prompts
    }

    async fn discover_resources(&self, principal: Option<&Principal>) -> Vec<ResourceRecord> {
        let live = self.visible(principal).await;
        let listed = self
            .fan_out(&live, CapabilityKind::Resource, |c| {
                async move { c.list_resources().await }.boxed()
            })
            .await;
        let rules = self.rules().await;

        let mut map = NamespaceMap::default();
        let mut resources = Vec::new();
        for (conn, items) in listed {
            for mut resource in items {
                if let Some(rule) = rules
                    .iter()
                    .find(|r| r.matches(&conn.server_id, CapabilityKind::Resource, &resource.uri))
                {
                    rule.apply_to_resource(&mut resource);
                }
                resource.uri = map.insert(&conn.server_name, &resource.uri);
                resources.push(resource);
            }
        }

        self.namespaces.replace(CapabilityKind::Resource, map).await;
        resources
    }

    async fn discover_templates(
        &self,
        principal: Option<&Principal>,
    ) -> Vec<ResourceTemplateRecord> {
        let live = self.visible(principal).await;
        let listed = self
            .fan_out(&live, CapabilityKind::ResourceTemplate, |c| {
                async move { c.list_resource_templates().await }.boxed()
            })
            .await;
        let rules = self.rules().await;

        let mut map = NamespaceMap::default();
        let mut templates = Vec::new();
        for (conn, items) in listed {
            for mut template in items {
                if let Some(rule) = rules.iter().find(|r| {
                    r.matches(
                        &conn.server_id,
                        CapabilityKind::ResourceTemplate,
                        &template.uri_template,
                    )
                }) {
                    rule.apply_to_template(&mut template);
                }
                template.uri_template = map.insert(&conn.server_name, &template.uri_template);
                templates.push(template);
            }
        }

        self.namespaces
            .replace(CapabilityKind::ResourceTemplate, map)
            .await;
        templates
    }

    /// Union of the tools of every running backend `token` may reach.
    pub async fn list_tools(&self, token: Option<&str>) -> Vec<ToolRecord> {
        match self.access.discovery_principal(token).await {
            Some(principal) => self.discover_tools(Some(&principal)).await,
            None => Vec::new(),
        }
    }

    pub async fn list_prompts(&self, token: Option<&str>) -> Vec<PromptRecord> {
        match self.access.discovery_principal(token).await {
            Some(principal) => self.discover_prompts(Some(&principal)).await,
            None => Vec::new(),
        }
    }

    /// Resources with URIs rewritten to `resource://<server>/<path>`.
    pub async fn list_resources(&self, token: Option<&str>) -> Vec<ResourceRecord> {
        match self.access.discovery_principal(token).await {
            Some(principal) => self.discover_resources(Some(&principal)).await,
            None => Vec::new(),
        }
    }

    pub async fn list_resource_templates(
        &self,
        token: Option<&str>,
    ) -> Vec<ResourceTemplateRecord> {
        match self.access.discovery_principal(token).await {
            Some(principal) => self.discover_templates(Some(&principal)).await,
            None => Vec::new(),
        }
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Route for a tool or prompt name. A miss triggers one unfiltered
    /// discovery pass before giving up.
    async fn route(&self, kind: CapabilityKind, name: &str) -> Result<Route, GatewayError> {
        let (table, label) = match kind {
            CapabilityKind::Prompt => (&self.prompts, "prompt"),
            _ => (&self.tools, "tool"),
        };
        if let Some(route) = table.lookup(name).await {
            return Ok(route);
        }

        tracing::debug!(name, label, "Route miss, refreshing");
        match kind {
            CapabilityKind::Prompt => {
                self.discover_prompts(None).await;
            }
            _ => {
                self.discover_tools(None).await;
            }
        }
        table
            .lookup(name)
            .await
            .ok_or_else(|| GatewayError::invalid_request(format!("Unknown {label}: {name}")))
    }

    /// Call a tool by its client-visible name.
    ///
    /// Exactly one audit entry is written whatever the outcome.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let request = json!({ "name": name, "arguments": arguments });
        let mut trace = AuditTrace::begin(RequestType::ToolsCall, name, &request);

        let result = self
            .invoke_routed(&mut trace, CapabilityKind::Tool, name, arguments, request, token)
            .await;

        self.audit.record(trace, result.as_ref().err()).await;
        result
    }

    /// Fetch a prompt by its client-visible name.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
        token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let request = json!({ "name": name, "arguments": arguments });
        let mut trace = AuditTrace::begin(RequestType::PromptsGet, name, &request);

        let result = self
            .invoke_routed(&mut trace, CapabilityKind::Prompt, name, arguments, request, token)
            .await;

        self.audit.record(trace, result.as_ref().err()).await;
        result
    }

    /// Authenticate, route `name` and invoke it.
    ///
    /// Credentials are checked before routing so a rejected caller never
    /// triggers a refresh; scope is checked once the server is known.
    async fn invoke_routed(
        &self,
        trace: &mut AuditTrace,
        kind: CapabilityKind,
        name: &str,
        arguments: Value,
        request: Value,
        token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let principal = self.access.authenticate(token).await?;
        trace.client_id = Some(principal.client_id().to_string());

        let route = self.route(kind, name).await?;
        let target = match kind {
            CapabilityKind::Prompt => Target::Prompt(&route.original_name),
            _ => Target::Tool(&route.original_name),
        };
        let invocation = Invocation {
            server_id: &route.server_id,
            target,
            client_name: name,
            arguments,
            request,
        };
        self.invoke(trace, token, invocation).await
    }

    /// Read a namespaced resource URI.
    ///
    /// Candidate backend URIs are tried in order until one returns
    /// content. When none does the result is an empty `contents` list.
    pub async fn read_resource(
        &self,
        uri: &str,
        token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let request = json!({ "uri": uri });
        let mut trace = AuditTrace::begin(RequestType::ResourcesRead, uri, &request);

        let result = self.read_resource_traced(&mut trace, uri, token, request).await;

        self.audit.record(trace, result.as_ref().err()).await;
        result
    }

    async fn read_resource_traced(
        &self,
        trace: &mut AuditTrace,
        uri: &str,
        token: Option<&str>,
        request: Value,
    ) -> Result<Value, GatewayError> {
        let principal = self.access.authenticate(token).await?;
        trace.client_id = Some(principal.client_id().to_string());

        let (server_name, candidates) = self.namespaces.candidates(uri).await?;
        let server = self.registry.get_by_name(&server_name).await?;
        let invocation = Invocation {
            server_id: &server.id,
            target: Target::Resource {
                uri,
                candidates: &candidates,
            },
            client_name: uri,
            arguments: request.clone(),
            request,
        };
        self.invoke(trace, token, invocation).await
    }

    async fn invoke(
        &self,
        trace: &mut AuditTrace,
        token: Option<&str>,
        invocation: Invocation<'_>,
    ) -> Result<Value, GatewayError> {
        let client_id = self.access.authorize(token, invocation.server_id).await?;
        trace.client_id = Some(client_id.clone());

        let live = self.registry.connection(invocation.server_id).await?;
        trace.set_server(&live.server_id, &live.server_name);

        let request_type = invocation.target.request_type();
        let context = InvocationContext::new(
            request_type,
            &live.server_id,
            &live.server_name,
            client_id,
            invocation.client_name,
            invocation.arguments,
            invocation.request,
        );
        let target = &invocation.target;

        if let Some(workflow) = self.workflows.active_for(request_type).await {
            tracing::debug!(workflow_id = %workflow.workflow.id, %request_type, "Running active workflow");
            let run = self
                .workflows
                .execute(&workflow, context, |ctx| {
                    self.call_backend(&live, target, ctx.arguments).boxed()
                })
                .await;
            let (_, result) = run.into_result();
            return result;
        }

        self.run_with_hooks(&live, target, context).await
    }

    async fn run_with_hooks(
        &self,
        live: &LiveConnection,
        target: &Target<'_>,
        context: InvocationContext,
    ) -> Result<Value, GatewayError> {
        let pre = self.hooks.run_phase(HookPhase::Pre, context).await;
        if !pre.proceed {
            return Err(stopped_phase(pre.error));
        }

        let mut context = pre.context;
        let result = self
            .call_backend(live, target, context.arguments.clone())
            .await;
        match &result {
            Ok(value) => context.response = Some(value.clone()),
            Err(e) => context.error = Some(e.to_string()),
        }

        let post = self.hooks.run_phase(HookPhase::Post, context).await;
        // A backend failure wins over anything the post phase decides.
        let value = result?;
        if !post.proceed {
            return Err(stopped_phase(post.error));
        }
        // A hook that unsets the response leaves the backend's answer.
        Ok(post.context.response.unwrap_or(value))
    }

    async fn call_backend(
        &self,
        live: &LiveConnection,
        target: &Target<'_>,
        arguments: Value,
    ) -> Result<Value, GatewayError> {
        let deadline = self.config.backend_call_timeout;
        match target {
            Target::Tool(name) => {
                tracing::debug!(server_id = %live.server_id, tool = %name, "Calling backend tool");
                timed(
                    deadline,
                    &live.server_name,
                    live.connection.call_tool(name, arguments),
                )
                .await
            }
            Target::Prompt(name) => {
                timed(
                    deadline,
                    &live.server_name,
                    live.connection.get_prompt(name, arguments),
                )
                .await
            }
            Target::Resource { uri, candidates } => {
                // Hooks and workflows may rewrite `arguments.uri`.
                let requested = arguments.get("uri").and_then(Value::as_str).unwrap_or(*uri);
                if requested == *uri {
                    return Ok(self.read_candidates(live, candidates).await);
                }
                let rewritten = self.rewritten_candidates(live, requested).await?;
                tracing::debug!(server_id = %live.server_id, from = %uri, to = %requested, "Read URI rewritten");
                Ok(self.read_candidates(live, &rewritten).await)
            }
        }
    }

    /// Backend URIs for a rewritten read. A namespaced URI must name the
    /// same server; anything else is sent to the backend verbatim.
    async fn rewritten_candidates(
        &self,
        live: &LiveConnection,
        uri: &str,
    ) -> Result<Vec<String>, GatewayError> {
        if !uri.starts_with(RESOURCE_SCHEME) {
            return Ok(vec![uri.to_string()]);
        }
        let (server_name, candidates) = self.namespaces.candidates(uri).await?;
        if server_name != live.server_name {
            return Err(GatewayError::invalid_request(format!(
                "Rewritten URI {uri} leaves server {}",
                live.server_name
            )));
        }
        Ok(candidates)
    }

    async fn read_candidates(&self, live: &LiveConnection, candidates: &[String]) -> Value {
        for candidate in candidates {
            match timed(
                self.config.backend_call_timeout,
                &live.server_name,
                live.connection.read_resource(candidate),
            )
            .await
            {
                Ok(value) if has_contents(&value) => return value,
                Ok(_) => {
                    tracing::debug!(server_id = %live.server_id, uri = %candidate, "Empty read, trying next form");
                }
                Err(e) => {
                    tracing::debug!(server_id = %live.server_id, uri = %candidate, error = %e, "Read failed, trying next form");
                }
            }
        }
        tracing::info!(server_id = %live.server_id, tried = candidates.len(), "No URI form returned content");
        json!({ "contents": [] })
    }

    // =========================================================================
    // Protocol surface
    // =========================================================================

    /// Answer one JSON-RPC message. Notifications get no response.
    ///
    /// `header_token` is the transport's authorization header, if any.
    pub async fn handle(
        &self,
        request: JsonRpcRequest,
        header_token: Option<&str>,
    ) -> Option<JsonRpcResponse> {
        let token = extract_token(header_token, request.params.as_ref());
        let parsed = McpRequest::parse(&request.method, request.params.as_ref());

        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        };

        let result = match parsed {
            Ok(parsed) => self.dispatch(parsed, token.as_deref()).await,
            Err(e) => Err(e),
        };
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                tracing::debug!(method = %request.method, kind = e.kind(), error = %e, "Request failed");
                JsonRpcResponse::failure(id, &e)
            }
        })
    }

    async fn dispatch(
        &self,
        request: McpRequest,
        token: Option<&str>,
    ) -> Result<Value, GatewayError> {
        Ok(match request {
            McpRequest::Initialize(params) => {
                if let Some(client) = &params.client_info {
                    tracing::info!(client = %client.name, version = %client.version, "Client initialized");
                }
                json!({
                    "protocolVersion": self.config.protocol_version,
                    "capabilities": {
                        "tools": { "listChanged": false },
                        "resources": { "subscribe": false, "listChanged": false },
                        "prompts": { "listChanged": false }
                    },
                    "serverInfo": {
                        "name": self.config.server_name,
                        "version": self.config.server_version
                    }
                })
            }
            McpRequest::Ping | McpRequest::Notification(_) => json!({}),
            McpRequest::ToolsList => json!({ "tools": self.list_tools(token).await }),
            McpRequest::ToolsCall(params) => {
                self.call_tool(&params.name, params.arguments, token).await?
            }
            McpRequest::ResourcesList => {
                json!({ "resources": self.list_resources(token).await })
            }
            McpRequest::ResourceTemplatesList => {
                json!({ "resourceTemplates": self.list_resource_templates(token).await })
            }
            McpRequest::ResourcesRead(params) => self.read_resource(&params.uri, token).await?,
            McpRequest::PromptsList => json!({ "prompts": self.list_prompts(token).await }),
            McpRequest::PromptsGet(params) => {
                self.get_prompt(&params.name, params.arguments, token).await?
            }
        })
    }
}
