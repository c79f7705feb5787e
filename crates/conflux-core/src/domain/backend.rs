//! Backend server domain types.
//!
//! A backend is an independent tool server reached either by spawning a
//! local process (stdio) or by dialing a remote HTTP endpoint.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of backend connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendServerType {
    /// Stdio-based server - the gateway spawns and owns the process
    #[default]
    Stdio,
    /// Remote server - the gateway posts JSON-RPC requests over HTTP
    Http,
}

/// Runtime status of a backend connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No live connection
    #[default]
    Stopped,
    /// Connection is being established
    Starting,
    /// Connected and initialized
    Running,
    /// Connection is being torn down
    Stopping,
    /// Last start attempt or live connection failed
    Error,
}

impl ConnectionStatus {
    /// Lowercase wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment variable entry for stdio backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    /// Environment variable key
    pub key: String,
    /// Environment variable value, may contain `${input:NAME}` placeholders
    pub value: String,
}

impl EnvEntry {
    /// Create a new environment variable entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A named input parameter a backend declares.
///
/// Values are substituted into `${input:NAME}` placeholders of the
/// connection descriptor right before connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParam {
    /// Placeholder name
    pub name: String,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether connecting fails when neither a value nor a default exists
    #[serde(default)]
    pub required: bool,
    /// Value used when the operator supplied none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Connection descriptor for a backend.
///
/// For stdio servers, `command` is required. For HTTP servers, `url` is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendServerConfig {
    // --- Stdio server fields ---
    /// Command to execute (e.g., "npx" or "/usr/local/bin/server").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments to pass to the executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Working directory for the process (must exist if specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Additional PATH entries to prepend to the child process PATH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_extra: Option<String>,

    // --- HTTP server fields ---
    /// Endpoint URL for remote servers (e.g., `http://localhost:3001/mcp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Bearer credential presented to the remote server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl BackendServerConfig {
    /// Create a stdio server configuration.
    #[must_use]
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args: Some(args),
            ..Self::default()
        }
    }

    /// Create a remote HTTP server configuration.
    #[must_use]
    pub fn http(url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            url: Some(url.into()),
            bearer_token,
            ..Self::default()
        }
    }

    /// Validate configuration based on server type.
    pub fn validate(&self, server_type: BackendServerType) -> Result<(), String> {
        match server_type {
            BackendServerType::Stdio => {
                let command = self
                    .command
                    .as_ref()
                    .ok_or_else(|| "Stdio server requires command".to_string())?;

                if command.is_empty() {
                    return Err("Stdio server command cannot be empty".to_string());
                }

                // Flags belong in args
                if command.contains(char::is_whitespace) {
                    return Err(format!(
                        "Command must be an executable name/path only, put flags in args: {command}"
                    ));
                }

                if let Some(ref cwd) = self.working_dir {
                    if !cwd.is_empty() && !std::path::Path::new(cwd).is_absolute() {
                        return Err(format!("Stdio server working_dir must be absolute: {cwd}"));
                    }
                }

                Ok(())
            }
            BackendServerType::Http => {
                let url = self
                    .url
                    .as_ref()
                    .ok_or_else(|| "HTTP server requires url".to_string())?;

                if url.is_empty() {
                    return Err("HTTP server url cannot be empty".to_string());
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(format!("HTTP server url must use http(s): {url}"));
                }

                Ok(())
            }
        }
    }
}

/// A configured backend server.
///
/// Owned by configuration storage; the gateway treats it as read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendServer {
    /// Stable identifier (referenced by tokens and routing).
    pub id: String,

    /// Unique display name, also the authority of namespaced resource URIs.
    pub name: String,

    /// Connection type.
    #[serde(default)]
    pub server_type: BackendServerType,

    /// Connection descriptor.
    #[serde(default)]
    pub config: BackendServerConfig,

    /// Environment variables for stdio processes.
    #[serde(default)]
    pub env: Vec<EnvEntry>,

    /// Declared input parameters.
    #[serde(default)]
    pub input_params: Vec<InputParam>,

    /// Operator supplied values for `input_params`.
    #[serde(default)]
    pub input_values: HashMap<String, String>,

    /// Disabled servers are never started.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Start when the gateway starts (or when the config appears).
    #[serde(default)]
    pub auto_start: bool,

    /// When the server was added.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

const fn default_true() -> bool {
    true
}

impl BackendServer {
    /// Create an enabled stdio backend.
    pub fn new_stdio(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            server_type: BackendServerType::Stdio,
            config: BackendServerConfig::stdio(command, args),
            env: Vec::new(),
            input_params: Vec::new(),
            input_values: HashMap::new(),
            enabled: true,
            auto_start: false,
            created_at: Utc::now(),
        }
    }

    /// Create an enabled HTTP backend.
    pub fn new_http(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            server_type: BackendServerType::Http,
            config: BackendServerConfig::http(url, bearer_token),
            env: Vec::new(),
            input_params: Vec::new(),
            input_values: HashMap::new(),
            enabled: true,
            auto_start: false,
            created_at: Utc::now(),
        }
    }

    /// Validate the connection descriptor for this server's type.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Server id cannot be empty".to_string());
        }
        if self.name.is_empty() || self.name.contains(['/', ':']) {
            return Err(format!(
                "Server name must be non-empty and free of '/' and ':': {:?}",
                self.name
            ));
        }
        self.config.validate(self.server_type)
    }
}
