//! JSON-RPC envelopes and the closed set of methods the gateway serves.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use conflux_core::ports::{GatewayError, RpcError};

/// An inbound JSON-RPC message. Without an `id` it is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &GatewayError) -> Self {
        Self::error(id, error.to_rpc_error())
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
    #[serde(default)]
    pub capabilities: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPromptParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Every method the gateway understands.
#[derive(Debug, Clone, PartialEq)]
pub enum McpRequest {
    Initialize(InitializeParams),
    Ping,
    ToolsList,
    ToolsCall(CallToolParams),
    ResourcesList,
    ResourceTemplatesList,
    ResourcesRead(ReadResourceParams),
    PromptsList,
    PromptsGet(GetPromptParams),
    /// Any `notifications/*` message. Accepted and ignored.
    Notification(String),
}

fn decode_params<T: DeserializeOwned>(method: &str, params: Option<&Value>) -> Result<T, GatewayError> {
    let params = params.cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(params)
        .map_err(|e| GatewayError::InvalidParams(format!("{method}: {e}")))
}

impl McpRequest {
    /// Decode a method name and its params.
    ///
    /// # Errors
    ///
    /// `MethodNotFound` for anything outside the supported set,
    /// `InvalidParams` when params do not fit the method.
    pub fn parse(method: &str, params: Option<&Value>) -> Result<Self, GatewayError> {
        Ok(match method {
            "initialize" => Self::Initialize(decode_params(method, params)?),
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall(decode_params(method, params)?),
            "resources/list" => Self::ResourcesList,
            "resources/templates/list" => Self::ResourceTemplatesList,
            "resources/read" => Self::ResourcesRead(decode_params(method, params)?),
            "prompts/list" => Self::PromptsList,
            "prompts/get" => Self::PromptsGet(decode_params(method, params)?),
            m if m.starts_with("notifications/") => Self::Notification(m.to_string()),
            other => return Err(GatewayError::MethodNotFound(other.to_string())),
        })
    }
}

/// Token from an `Authorization: Bearer <token>` style value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

/// Credential for a request: the transport header if present, else
/// `params._meta.token` or `params._meta.authorization`.
pub fn extract_token(header: Option<&str>, params: Option<&Value>) -> Option<String> {
    if let Some(token) = header.and_then(bearer_token) {
        return Some(token.to_string());
    }
    let meta = params?.get("_meta")?;
    ["token", "authorization"]
        .into_iter()
        .filter_map(|key| meta.get(key).and_then(Value::as_str))
        .find_map(bearer_token)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_methods() {
        let call = McpRequest::parse(
            "tools/call",
            Some(&json!({"name": "fetch", "arguments": {"url": "x"}})),
        )
        .unwrap();
        assert_eq!(
            call,
            McpRequest::ToolsCall(CallToolParams {
                name: "fetch".into(),
                arguments: json!({"url": "x"}),
            })
        );
        assert_eq!(McpRequest::parse("tools/list", None).unwrap(), McpRequest::ToolsList);
        assert_eq!(
            McpRequest::parse("notifications/initialized", None).unwrap(),
            McpRequest::Notification("notifications/initialized".into())
        );
        assert!(matches!(
            McpRequest::parse("initialize", None).unwrap(),
            McpRequest::Initialize(InitializeParams { client_info: None, .. })
        ));
    }

    #[test]
    fn test_unknown_method_and_bad_params() {
        assert!(matches!(
            McpRequest::parse("sampling/createMessage", None),
            Err(GatewayError::MethodNotFound(_))
        ));
        assert!(matches!(
            McpRequest::parse("resources/read", Some(&json!({"url": "x"}))),
            Err(GatewayError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_token_from_header_or_meta() {
        assert_eq!(extract_token(Some("Bearer T1"), None).as_deref(), Some("T1"));
        assert_eq!(extract_token(Some("bearer  T1 "), None).as_deref(), Some("T1"));
        let params = json!({"name": "x", "_meta": {"authorization": "Bearer T2"}});
        assert_eq!(extract_token(None, Some(&params)).as_deref(), Some("T2"));
        let params = json!({"_meta": {"token": "T3"}});
        assert_eq!(extract_token(Some("Bearer T1"), Some(&params)).as_deref(), Some("T1"));
        assert_eq!(extract_token(None, Some(&params)).as_deref(), Some("T3"));
        assert_eq!(extract_token(Some("Bearer "), None), None);
    }

    #[test]
    fn test_response_wire_format() {
        let ok = serde_json::to_value(JsonRpcResponse::success(json!(1), json!({}))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));

        let err = JsonRpcResponse::failure(json!("a"), &GatewayError::MethodNotFound("x".into()));
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(err["error"]["code"], -32601);
        assert!(err.get("result").is_none());
    }
}
