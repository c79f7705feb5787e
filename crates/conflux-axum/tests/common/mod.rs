//! Shared fixtures for router tests.
//!
//! Backends are in-process doubles; no process is ever spawned.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use conflux_axum::{AppState, CorsConfig, GatewayDeps, SeedFile, assemble, create_router};
use conflux_core::ports::{BackendConnection, BackendError, ConnectionFactory};
use conflux_core::{
    BackendServer, PromptRecord, ResourceRecord, ResourceTemplateRecord, ToolRecord,
};
use conflux_store::{MemoryAuditSink, MemoryStore};

/// Every backend exposes `<name>_echo`, a `greet` prompt and one readable
/// resource at `file:///readme`.
pub struct StaticBackend {
    name: String,
}

#[async_trait]
impl BackendConnection for StaticBackend {
    async fn list_tools(&self) -> Result<Vec<ToolRecord>, BackendError> {
        Ok(vec![ToolRecord::new(
            format!("{}_echo", self.name),
            "Echo the arguments",
        )])
    }

    async fn list_resources(&self) -> Result<Vec<ResourceRecord>, BackendError> {
        Ok(vec![ResourceRecord::new("file:///readme", "readme")])
    }

    async fn list_resource_templates(
        &self,
    ) -> Result<Vec<ResourceTemplateRecord>, BackendError> {
        Ok(Vec::new())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptRecord>, BackendError> {
        Ok(vec![PromptRecord::new("greet")])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        Ok(json!({
            "content": [{ "type": "text", "text": format!("{}:{name}", self.name) }],
            "echo": arguments,
        }))
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, BackendError> {
        if uri == "file:///readme" {
            Ok(json!({ "contents": [{ "uri": uri, "text": format!("readme of {}", self.name) }] }))
        } else {
            Err(BackendError::new(-32002, format!("Resource not found: {uri}")))
        }
    }

    async fn get_prompt(&self, name: &str, _arguments: Value) -> Result<Value, BackendError> {
        Ok(json!({ "messages": [{ "role": "user", "content": { "type": "text", "text": name } }] }))
    }

    async fn close(&self) {}
}

pub struct StaticFactory;

#[async_trait]
impl ConnectionFactory for StaticFactory {
    async fn connect(
        &self,
        server: &BackendServer,
    ) -> Result<Arc<dyn BackendConnection>, BackendError> {
        Ok(Arc::new(StaticBackend {
            name: server.name.clone(),
        }))
    }
}

/// An auto-started stdio backend config served by [`StaticFactory`].
pub fn backend(id: &str, name: &str) -> BackendServer {
    let mut server = BackendServer::new_stdio(id, name, "unused", Vec::new());
    server.auto_start = true;
    server
}

pub async fn test_app(seed: SeedFile) -> (Router, AppState) {
    let ctx = assemble(GatewayDeps {
        config: seed.gateway,
        store: Arc::new(MemoryStore::from_seed(seed.store)),
        audit: Arc::new(MemoryAuditSink::new(100)),
        factory: Arc::new(StaticFactory),
    })
    .await
    .unwrap();
    let state: AppState = Arc::new(ctx);
    (create_router(state.clone(), &CorsConfig::AllowAll), state)
}

/// Send one request and decode the body as JSON (`Null` when empty).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

/// POST a JSON-RPC request to `/mcp`.
pub async fn rpc(
    app: &Router,
    token: Option<&str>,
    id: i64,
    method: &str,
    params: Value,
) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/mcp",
        token,
        Some(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })),
    )
    .await
}
