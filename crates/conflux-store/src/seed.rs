//! Seed documents for the in-memory store.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use conflux_core::{BackendServer, DisplayRule, Hook, Token, Workflow};

/// Errors loading a seed document.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid seed document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Initial configuration records.
///
/// ```json
/// {
///   "servers": [{ "id": "fs", "name": "filesystem", "config": { "command": "npx" } }],
///   "tokens": [{ "id": "t1", "clientId": "cli", "issuedAt": "2024-01-01T00:00:00Z", "serverIds": ["fs"] }],
///   "hooks": [],
///   "workflows": [],
///   "displayRules": []
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub servers: Vec<BackendServer>,
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub hooks: Vec<Hook>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub display_rules: Vec<DisplayRule>,
}

impl Seed {
    /// Parse a seed document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a seed file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SeedError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json(&text)
    }
}
