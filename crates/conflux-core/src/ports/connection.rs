//! Backend connection ports.
//!
//! The capability protocol runtime of a backend is a black box reached
//! through a [`BackendConnection`]. A [`ConnectionFactory`] spawns or dials
//! one from a [`BackendServer`] config.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::BackendError;
use crate::domain::{
    BackendServer, PromptRecord, ResourceRecord, ResourceTemplateRecord, ToolRecord,
};

/// A live, initialized connection to one backend.
///
/// Results of invocations are returned as the backend's raw JSON payload so
/// they reach the client unchanged.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolRecord>, BackendError>;

    async fn list_resources(&self) -> Result<Vec<ResourceRecord>, BackendError>;

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplateRecord>, BackendError>;

    async fn list_prompts(&self) -> Result<Vec<PromptRecord>, BackendError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError>;

    async fn read_resource(&self, uri: &str) -> Result<Value, BackendError>;

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, BackendError>;

    /// Tear down the process or socket. Idempotent.
    async fn close(&self);

    /// Resolves with a reason once the backend goes away on its own.
    ///
    /// Connections that cannot tell never resolve.
    async fn closed(&self) -> String {
        std::future::pending().await
    }
}

/// Spawns or dials backend connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        server: &BackendServer,
    ) -> Result<Arc<dyn BackendConnection>, BackendError>;
}
