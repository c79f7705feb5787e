//! Gateway configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Protocol revision announced by `initialize` and sent to backends.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client id used for requests without a credential when auth is optional.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Tunables for the aggregation gateway.
///
/// Durations are (de)serialized as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Echoed by `initialize` and sent to backends.
    pub protocol_version: String,
    /// `serverInfo.name` returned by `initialize`.
    pub server_name: String,
    /// `serverInfo.version` returned by `initialize`.
    pub server_version: String,
    /// When false, requests without a credential run as [`ANONYMOUS_CLIENT`].
    /// A supplied credential is always validated.
    pub require_auth: bool,
    /// Wall-clock limit for one hook script run.
    #[serde(with = "millis", rename = "hookTimeoutMs")]
    pub hook_timeout: Duration,
    /// Deadline for one backend invocation.
    #[serde(with = "millis", rename = "backendCallTimeoutMs")]
    pub backend_call_timeout: Duration,
    /// Deadline for one backend's contribution to a discovery pass.
    #[serde(with = "millis", rename = "discoveryTimeoutMs")]
    pub discovery_timeout: Duration,
    /// Deadline for spawning/dialing and initializing a backend.
    #[serde(with = "millis", rename = "startupTimeoutMs")]
    pub startup_timeout: Duration,
    /// Evaluation steps allowed per hook script run.
    pub script_step_limit: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            server_name: "conflux".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            require_auth: false,
            hook_timeout: Duration::from_secs(5),
            backend_call_timeout: Duration::from_secs(60),
            discovery_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(30),
            script_step_limit: 10_000,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
