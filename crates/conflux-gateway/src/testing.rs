//! In-process backend doubles for gateway tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use conflux_core::ports::{
    BackendConnection, BackendError, ConnectionFactory, GatewayEventEmitter,
};
use conflux_core::{
    BackendServer, GatewayEvent, PromptRecord, ResourceRecord, ResourceTemplateRecord,
    ToolRecord,
};

#[derive(Default)]
struct Stats {
    invocations: AtomicUsize,
    list_calls: AtomicUsize,
    closed: AtomicBool,
    lost: Notify,
    calls: Mutex<Vec<(String, Value)>>,
    reads: Mutex<Vec<String>>,
}

/// A scripted backend. Clones share call counters.
#[derive(Clone, Default)]
pub struct FakeBackend {
    label: String,
    tools: Vec<ToolRecord>,
    resources: Vec<ResourceRecord>,
    templates: Vec<ResourceTemplateRecord>,
    prompts: Vec<PromptRecord>,
    contents: HashMap<String, String>,
    call_error: Option<BackendError>,
    fail_listing: bool,
    delay: Option<Duration>,
    stats: Arc<Stats>,
}

impl FakeBackend {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }

    pub fn with_tool(mut self, name: &str) -> Self {
        self.tools
            .push(ToolRecord::new(name, format!("{name} on {}", self.label)));
        self
    }

    pub fn with_prompt(mut self, name: &str) -> Self {
        self.prompts.push(PromptRecord::new(name));
        self
    }

    /// Advertise a resource. `text` of `None` lists it without making it
    /// readable.
    pub fn with_resource(mut self, uri: &str, text: Option<&str>) -> Self {
        self.resources.push(ResourceRecord::new(uri, uri));
        if let Some(text) = text {
            self.contents.insert(uri.to_string(), text.to_string());
        }
        self
    }

    /// Make a URI readable without advertising it.
    pub fn with_content(mut self, uri: &str, text: &str) -> Self {
        self.contents.insert(uri.to_string(), text.to_string());
        self
    }

    pub fn with_template(mut self, uri_template: &str) -> Self {
        self.templates.push(ResourceTemplateRecord {
            uri_template: uri_template.to_string(),
            name: uri_template.to_string(),
            description: None,
            mime_type: None,
            extra: serde_json::Map::new(),
        });
        self
    }

    pub fn failing_calls(mut self, error: BackendError) -> Self {
        self.call_error = Some(error);
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Tool calls and prompt gets that reached this backend.
    pub fn invocations(&self) -> usize {
        self.stats.invocations.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.stats.list_calls.load(Ordering::SeqCst)
    }

    /// `(name, arguments)` of every tool call and prompt get.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.stats.calls.lock().unwrap().clone()
    }

    /// URIs passed to `read_resource`, in order.
    pub fn reads(&self) -> Vec<String> {
        self.stats.reads.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Act like the backend process died.
    pub fn crash(&self) {
        self.stats.lost.notify_one();
    }

    async fn listing<T: Clone>(&self, items: &[T]) -> Result<Vec<T>, BackendError> {
        self.stats.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_listing {
            return Err(BackendError::new(-32603, format!("{} is broken", self.label)));
        }
        Ok(items.to_vec())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<(), BackendError> {
        self.stats.invocations.fetch_add(1, Ordering::SeqCst);
        self.stats
            .calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.call_error.clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl BackendConnection for FakeBackend {
    async fn list_tools(&self) -> Result<Vec<ToolRecord>, BackendError> {
        self.listing(&self.tools).await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceRecord>, BackendError> {
        self.listing(&self.resources).await
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplateRecord>, BackendError> {
        self.listing(&self.templates).await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptRecord>, BackendError> {
        self.listing(&self.prompts).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        self.invoke(name, arguments.clone()).await?;
        Ok(json!({
            "content": [{ "type": "text", "text": format!("{}:{name}", self.label) }],
            "arguments": arguments
        }))
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, BackendError> {
        self.stats.reads.lock().unwrap().push(uri.to_string());
        self.contents.get(uri).map_or_else(
            || Err(BackendError::new(-32002, format!("Resource not found: {uri}"))),
            |text| Ok(json!({ "contents": [{ "uri": uri, "text": text }] })),
        )
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        self.invoke(name, arguments).await?;
        Ok(json!({
            "description": format!("{}:{name}", self.label),
            "messages": []
        }))
    }

    async fn close(&self) {
        self.stats.closed.store(true, Ordering::SeqCst);
    }

    async fn closed(&self) -> String {
        self.stats.lost.notified().await;
        format!("{} exited", self.label)
    }
}

/// Factory handing out [`FakeBackend`]s by server id. Unknown ids fail.
#[derive(Default)]
pub struct FakeFactory {
    backends: HashMap<String, FakeBackend>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, server_id: &str, backend: FakeBackend) -> Self {
        self.backends.insert(server_id.to_string(), backend);
        self
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(
        &self,
        server: &BackendServer,
    ) -> Result<Arc<dyn BackendConnection>, BackendError> {
        self.backends.get(&server.id).map_or_else(
            || Err(BackendError::transport("connection refused")),
            |backend| Ok(Arc::new(backend.clone()) as Arc<dyn BackendConnection>),
        )
    }
}

/// Emitter that keeps every event for inspection.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<GatewayEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl GatewayEventEmitter for RecordingEmitter {
    fn emit(&self, event: GatewayEvent) {
        self.events.lock().unwrap().push(event);
    }
}
