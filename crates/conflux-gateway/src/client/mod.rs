//! JSON-RPC client for backend capability servers.
//!
//! Two transports carry the same protocol:
//! - [`StdioTransport`]: newline-delimited JSON over a child process's stdio
//! - [`HttpTransport`]: one POST per message, JSON or single-event SSE reply
//!
//! [`RpcConnection`] performs the `initialize` handshake over either one and
//! implements the [`BackendConnection`] port.

mod http;
mod stdio;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use conflux_core::ports::{BackendConnection, BackendError};
use conflux_core::{PromptRecord, ResourceRecord, ResourceTemplateRecord, ToolRecord};

pub use http::HttpTransport;
pub use stdio::{SpawnSpec, StdioTransport};

/// Upper bound on `nextCursor` pages followed for one list call.
const MAX_LIST_PAGES: usize = 100;

/// Outgoing JSON-RPC 2.0 request.
#[derive(Debug, Serialize)]
struct OutgoingRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// Outgoing JSON-RPC 2.0 notification.
#[derive(Debug, Serialize)]
struct OutgoingNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// Any message a backend sends: a response, a request or a notification.
#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<BackendError>,
}

impl IncomingMessage {
    fn is_response(&self) -> bool {
        self.method.is_none() && self.id.is_some()
    }

    /// Turn a response into the call result. Backend errors are kept verbatim.
    fn into_result(self) -> Result<Value, BackendError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.result
            .ok_or_else(|| BackendError::transport("Missing result in response"))
    }
}

/// Message framing used by one backend connection.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send a request and wait for its response.
    ///
    /// Dropping the returned future abandons the request; transports that
    /// can, tell the backend with `notifications/cancelled`.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BackendError>;

    /// Release the process or session. Idempotent.
    async fn close(&self);

    /// Resolves with a reason once the peer is gone. Transports without a
    /// persistent channel never resolve.
    async fn closed(&self) -> String {
        std::future::pending().await
    }
}

/// Identity the gateway presents to backends.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_version: String,
    pub client_name: String,
    pub client_version: String,
}

/// Server information from initialize.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Capabilities a backend advertised during initialize.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    protocol_version: Option<String>,
    #[serde(rename = "serverInfo", default)]
    server_info: Option<ServerInfo>,
    #[serde(default)]
    capabilities: ServerCapabilities,
}

/// An initialized connection to one backend.
pub struct RpcConnection {
    label: String,
    transport: Arc<dyn RpcTransport>,
    capabilities: ServerCapabilities,
    server_info: Option<ServerInfo>,
}

impl RpcConnection {
    /// Run the `initialize` handshake and send `notifications/initialized`.
    ///
    /// The transport is closed if the handshake fails.
    pub async fn initialize(
        label: impl Into<String>,
        transport: Arc<dyn RpcTransport>,
        handshake: &Handshake,
    ) -> Result<Self, BackendError> {
        let label = label.into();
        let params = json!({
            "protocolVersion": handshake.protocol_version,
            "clientInfo": {
                "name": handshake.client_name,
                "version": handshake.client_version,
            },
            "capabilities": {}
        });

        let result = match transport.request("initialize", Some(params)).await {
            Ok(result) => result,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };
        let init: InitializeResult = match decode(result) {
            Ok(init) => init,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        if let Err(e) = transport.notify("notifications/initialized", None).await {
            transport.close().await;
            return Err(e);
        }

        tracing::debug!(
            server = %label,
            protocol_version = init.protocol_version.as_deref().unwrap_or("unknown"),
            backend = init.server_info.as_ref().map_or("unknown", |i| i.name.as_str()),
            "Backend initialized"
        );

        Ok(Self {
            label,
            transport,
            capabilities: init.capabilities,
            server_info: init.server_info,
        })
    }

    pub const fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub const fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Call a `*/list` method, following `nextCursor` pagination.
    async fn list_paged<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &str,
    ) -> Result<Vec<T>, BackendError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut result = self.transport.request(method, params).await?;

            if let Some(page) = result.get_mut(key).map(Value::take) {
                let page: Vec<T> = decode(page)?;
                items.extend(page);
            }

            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => return Ok(items),
            }
        }

        tracing::warn!(server = %self.label, method, "Stopped following list pagination");
        Ok(items)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value)
        .map_err(|e| BackendError::transport(format!("Malformed backend response: {e}")))
}

#[async_trait]
impl BackendConnection for RpcConnection {
    async fn list_tools(&self) -> Result<Vec<ToolRecord>, BackendError> {
        if self.capabilities.tools.is_none() {
            return Ok(Vec::new());
        }
        self.list_paged("tools/list", "tools").await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceRecord>, BackendError> {
        if self.capabilities.resources.is_none() {
            return Ok(Vec::new());
        }
        self.list_paged("resources/list", "resources").await
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplateRecord>, BackendError> {
        if self.capabilities.resources.is_none() {
            return Ok(Vec::new());
        }
        self.list_paged("resources/templates/list", "resourceTemplates")
            .await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptRecord>, BackendError> {
        if self.capabilities.prompts.is_none() {
            return Ok(Vec::new());
        }
        self.list_paged("prompts/list", "prompts").await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.transport.request("tools/call", Some(params)).await
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, BackendError> {
        self.transport
            .request("resources/read", Some(json!({ "uri": uri })))
            .await
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.transport.request("prompts/get", Some(params)).await
    }

    async fn close(&self) {
        self.transport.close().await;
    }

    async fn closed(&self) -> String {
        self.transport.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport answering from a script of canned results.
    struct ScriptedTransport {
        replies: Mutex<Vec<(String, Value)>>,
        sent: Mutex<Vec<(String, Option<Value>)>>,
        closed: Mutex<bool>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<(&str, Value)>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|(m, v)| (m.to_string(), v))
                        .collect(),
                ),
                sent: Mutex::new(Vec::new()),
                closed: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
            self.sent.lock().unwrap().push((method.to_string(), params));
            let (expected, reply) = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::transport("no more replies"))?;
            assert_eq!(expected, method);
            if let Some(error) = reply.get("error") {
                return Err(serde_json::from_value(error.clone()).unwrap());
            }
            Ok(reply)
        }

        async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BackendError> {
            self.sent.lock().unwrap().push((method.to_string(), params));
            Ok(())
        }

        async fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn handshake() -> Handshake {
        Handshake {
            protocol_version: "2024-11-05".into(),
            client_name: "conflux".into(),
            client_version: "test".into(),
        }
    }

    fn init_reply(capabilities: Value) -> (&'static str, Value) {
        (
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "fake"},
                "capabilities": capabilities
            }),
        )
    }

    #[test]
    fn test_outgoing_request_omits_missing_params() {
        let request = OutgoingRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "tools/list",
            params: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_incoming_error_kept_verbatim() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32001,"message":"nope","data":{"x":1}}}"#;
        let message: IncomingMessage = serde_json::from_str(raw).unwrap();
        assert!(message.is_response());
        let err = message.into_result().unwrap_err();
        assert_eq!(err.code, -32001);
        assert_eq!(err.data, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_initialize_sends_initialized_notification() {
        let transport = ScriptedTransport::new(vec![init_reply(json!({"tools": {}}))]);
        let connection = RpcConnection::initialize("alpha", transport.clone(), &handshake())
            .await
            .unwrap();

        assert_eq!(connection.server_info().unwrap().name, "fake");
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].0, "initialize");
        assert_eq!(sent[1].0, "notifications/initialized");
    }

    #[tokio::test]
    async fn test_failed_initialize_closes_transport() {
        let transport = ScriptedTransport::new(vec![(
            "initialize",
            json!({"error": {"code": -32603, "message": "boom"}}),
        )]);
        let result = RpcConnection::initialize("alpha", transport.clone(), &handshake()).await;
        assert_eq!(result.err().unwrap().message, "boom");
        assert!(*transport.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let transport = ScriptedTransport::new(vec![
            init_reply(json!({"tools": {}})),
            (
                "tools/list",
                json!({"tools": [{"name": "a"}], "nextCursor": "p2"}),
            ),
            ("tools/list", json!({"tools": [{"name": "b"}]})),
        ]);
        let connection = RpcConnection::initialize("alpha", transport.clone(), &handshake())
            .await
            .unwrap();

        let tools = connection.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(
            transport.sent.lock().unwrap()[3].1,
            Some(json!({"cursor": "p2"}))
        );
    }

    #[tokio::test]
    async fn test_missing_capability_lists_nothing() {
        let transport = ScriptedTransport::new(vec![init_reply(json!({"tools": {}}))]);
        let connection = RpcConnection::initialize("alpha", transport, &handshake())
            .await
            .unwrap();

        assert!(connection.list_prompts().await.unwrap().is_empty());
        assert!(connection.list_resources().await.unwrap().is_empty());
    }
}
