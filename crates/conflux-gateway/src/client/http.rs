//! JSON-RPC over HTTP POST for remote backends.
//!
//! Replies arrive either as a JSON body or as a `text/event-stream` body
//! carrying the response in an SSE `data:` event.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

use conflux_core::codes;
use conflux_core::ports::BackendError;

use super::{IncomingMessage, OutgoingNotification, OutgoingRequest, RpcTransport};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Transport posting each message to one endpoint URL.
pub struct HttpTransport {
    label: String,
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(
        label: impl Into<String>,
        client: reqwest::Client,
        url: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            label: label.into(),
            client,
            url: url.into(),
            bearer_token,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    async fn post(&self, body: String) -> Result<reqwest::Response, BackendError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| {
            BackendError::transport(format!("{}: request failed: {e}", self.label))
        })?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::new(
                codes::INTERNAL_ERROR,
                format!("{}: HTTP {status}: {text}", self.label),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&OutgoingRequest {
            jsonrpc: "2.0",
            id,
            method,
            params: params.as_ref(),
        })
        .map_err(|e| BackendError::transport(e.to_string()))?;

        let response = self.post(body).await?;
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::transport(format!("{}: {e}", self.label)))?;

        let message = if is_sse {
            parse_sse_response(&text, id)?
        } else {
            serde_json::from_str::<IncomingMessage>(&text).map_err(|e| {
                BackendError::transport(format!("{}: malformed response: {e}", self.label))
            })?
        };
        message.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BackendError> {
        let body = serde_json::to_string(&OutgoingNotification {
            jsonrpc: "2.0",
            method,
            params: params.as_ref(),
        })
        .map_err(|e| BackendError::transport(e.to_string()))?;
        self.post(body).await.map(|_| ())
    }

    async fn close(&self) {
        let Some(session) = self.session_id.lock().ok().and_then(|mut s| s.take()) else {
            return;
        };
        let mut request = self.client.delete(&self.url).header(SESSION_HEADER, session);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Err(e) = request.send().await {
            tracing::debug!(server = %self.label, error = %e, "Failed to end HTTP session");
        }
    }
}

/// Find the response with `id` in an SSE body.
///
/// Events are separated by blank lines; multi-line `data:` fields are
/// joined with `\n`.
fn parse_sse_response(body: &str, id: u64) -> Result<IncomingMessage, BackendError> {
    let mut data = String::new();
    let mut events = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            if !data.is_empty() {
                events.push(std::mem::take(&mut data));
            }
            continue;
        }
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    events
        .iter()
        .filter_map(|event| serde_json::from_str::<IncomingMessage>(event).ok())
        .find(|m| m.is_response() && m.id.as_ref().and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| BackendError::transport("No response found in event stream"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sse_picks_matching_response() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"tools\":[]}}\n\n";
        let message = parse_sse_response(body, 7).unwrap();
        assert_eq!(message.into_result().unwrap(), json!({"tools": []}));
    }

    #[test]
    fn test_sse_joins_multiline_data() {
        let body = "data: {\"jsonrpc\":\"2.0\",\n\
                    data: \"id\":1,\"result\":{}}\n";
        assert!(parse_sse_response(body, 1).is_ok());
    }

    #[test]
    fn test_sse_without_response_is_error() {
        let err = parse_sse_response("data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n", 3)
            .err()
            .unwrap();
        assert!(err.message.contains("No response"));
    }
}
