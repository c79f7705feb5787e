//! Access tokens.
//!
//! Issuance and revocation live in configuration storage; the gateway only
//! reads tokens to decide which backends a client may reach.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scope granting access to every backend.
pub const SCOPE_ALL_SERVERS: &str = "server:*";

/// Scope prefix granting access to one backend (`server:<id>`).
pub const SCOPE_SERVER_PREFIX: &str = "server:";

/// An opaque bearer credential scoped to one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// The bearer value itself.
    pub id: String,
    /// Exactly one owning client.
    pub client_id: String,
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Backends this token may reach.
    #[serde(default)]
    pub server_ids: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Token {
    /// Create a non-expiring token for the given servers.
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        server_ids: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            issued_at: Utc::now(),
            expires_at: None,
            server_ids,
            scopes: Vec::new(),
        }
    }

    /// Whether the token is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Whether the token grants access to `server_id`, either directly or
    /// through a `server:*` / `server:<id>` scope.
    pub fn allows_server(&self, server_id: &str) -> bool {
        if self.server_ids.iter().any(|id| id == server_id) {
            return true;
        }
        self.scopes.iter().any(|scope| {
            scope == SCOPE_ALL_SERVERS
                || scope
                    .strip_prefix(SCOPE_SERVER_PREFIX)
                    .is_some_and(|id| id == server_id)
        })
    }
}
