//! Gateway lifecycle events.
//!
//! Events are serialized with a `type` tag:
//!
//! ```json
//! { "type": "backend_started", "serverId": "fs", "serverName": "filesystem" }
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle events emitted by the gateway services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A backend connection was established and initialized.
    BackendStarted {
        #[serde(rename = "serverId")]
        server_id: String,
        #[serde(rename = "serverName")]
        server_name: String,
        /// Number of tools the backend advertised at start.
        #[serde(rename = "toolCount")]
        tool_count: usize,
    },

    /// A backend connection was torn down.
    BackendStopped {
        #[serde(rename = "serverId")]
        server_id: String,
        #[serde(rename = "serverName")]
        server_name: String,
    },

    /// A backend failed to start or its connection broke.
    BackendError {
        #[serde(rename = "serverId")]
        server_id: String,
        #[serde(rename = "serverName")]
        server_name: String,
        message: String,
    },

    /// The in-memory hook list was rebuilt.
    HooksReloaded {
        /// Number of enabled hooks after reload.
        count: usize,
    },

    /// A workflow became the active one for its type.
    WorkflowActivated {
        #[serde(rename = "workflowId")]
        workflow_id: String,
        #[serde(rename = "workflowType")]
        workflow_type: String,
    },
}

impl GatewayEvent {
    pub fn backend_started(
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        tool_count: usize,
    ) -> Self {
        Self::BackendStarted {
            server_id: server_id.into(),
            server_name: server_name.into(),
            tool_count,
        }
    }

    pub fn backend_stopped(server_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self::BackendStopped {
            server_id: server_id.into(),
            server_name: server_name.into(),
        }
    }

    pub fn backend_error(
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BackendError {
            server_id: server_id.into(),
            server_name: server_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = GatewayEvent::backend_stopped("fs", "filesystem");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "backend_stopped");
        assert_eq!(json["serverId"], "fs");
        assert_eq!(json["serverName"], "filesystem");
    }
}
