//! Request audit trail.
//!
//! Every routed invocation produces exactly one [`AuditEntry`]. Parameters
//! are sanitized before they reach the sink.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use conflux_core::ports::{AuditSink, GatewayError};
use conflux_core::{AuditEntry, AuditResult, RequestType};

/// Placeholder written in place of credential-bearing values.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments (lowercased, `-` and `_` stripped) that mark a field as sensitive.
const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "password",
    "passwd",
    "secret",
    "apikey",
    "authorization",
    "credential",
    "cookie",
    "privatekey",
];

fn is_sensitive(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_KEYS.iter().any(|s| normalized.contains(s))
}

/// Strip credential-bearing fields and protocol metadata from `params`.
pub fn sanitize(params: &Value) -> Value {
    match params {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "_meta")
                .map(|(key, value)| {
                    let value = if is_sensitive(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

/// What is known about an invocation while it is in flight.
///
/// Filled in as routing progresses; turned into an entry by
/// [`AuditLog::record`].
#[derive(Debug, Clone)]
pub struct AuditTrace {
    request_type: RequestType,
    target: String,
    params: Value,
    started: Instant,
    pub client_id: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
}

impl AuditTrace {
    pub fn begin(request_type: RequestType, target: impl Into<String>, params: &Value) -> Self {
        Self {
            request_type,
            target: target.into(),
            params: params.clone(),
            started: Instant::now(),
            client_id: None,
            server_id: None,
            server_name: None,
        }
    }

    pub fn set_server(&mut self, server_id: &str, server_name: &str) {
        self.server_id = Some(server_id.to_string());
        self.server_name = Some(server_name.to_string());
    }
}

/// Writes audit entries to a sink without ever failing the call.
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record the outcome of one invocation.
    pub async fn record(&self, trace: AuditTrace, error: Option<&GatewayError>) {
        let duration_ms = u64::try_from(trace.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_type: trace.request_type.as_str().to_string(),
            client_id: trace
                .client_id
                .unwrap_or_else(|| crate::config::ANONYMOUS_CLIENT.to_string()),
            server_id: trace.server_id,
            server_name: trace.server_name,
            target: Some(trace.target),
            params: sanitize(&trace.params),
            result: if error.is_some() {
                AuditResult::Error
            } else {
                AuditResult::Success
            },
            duration_ms,
            error_message: error.map(ToString::to_string),
        };

        if let Err(e) = self.sink.store(entry).await {
            tracing::warn!(error = %e, "Failed to write audit entry");
        }
    }

    /// Most recent entries, newest last.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        match self.sink.recent(limit).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read audit entries");
                Vec::new()
            }
        }
    }
}
