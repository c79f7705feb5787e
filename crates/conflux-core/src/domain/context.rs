//! Per-invocation context shared by hooks, workflows and the audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Invocation request types that reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    #[serde(rename = "tools/call")]
    ToolsCall,
    #[serde(rename = "resources/read")]
    ResourcesRead,
    #[serde(rename = "prompts/get")]
    PromptsGet,
}

impl RequestType {
    /// Protocol method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolsCall => "tools/call",
            Self::ResourcesRead => "resources/read",
            Self::PromptsGet => "prompts/get",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one invocation.
///
/// Hooks see this as a JSON object with camelCase keys and may rewrite
/// `arguments`, `response` and `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub request_type: RequestType,
    pub server_id: String,
    pub server_name: String,
    pub client_id: String,
    /// Tool or prompt name, or resource URI, as the client sent it.
    pub tool_name: String,
    pub arguments: Value,
    /// Raw request params.
    pub request: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub started_at: DateTime<Utc>,
}

impl InvocationContext {
    pub fn new(
        request_type: RequestType,
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        client_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        request: Value,
    ) -> Self {
        Self {
            request_type,
            server_id: server_id.into(),
            server_name: server_name.into(),
            client_id: client_id.into(),
            tool_name: tool_name.into(),
            arguments,
            request,
            response: None,
            error: None,
            metadata: Map::new(),
            started_at: Utc::now(),
        }
    }
}
