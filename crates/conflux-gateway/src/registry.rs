//! Backend connection lifecycle.
//!
//! The registry is the sole owner of backend connection handles. Other
//! components borrow a handle for the duration of one call through
//! [`LiveConnection`] and refer to backends by id otherwise.
//!
//! Every running backend has a watcher task. When the backend goes away
//! on its own the watcher moves it to `error` and emits `backend_error`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;

use conflux_core::ports::{
    BackendConnection, ConnectionFactory, GatewayError, GatewayEventEmitter,
};
use conflux_core::{BackendServer, BackendServerType, ConnectionStatus, GatewayEvent};

use crate::connector::resolve_inputs;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Backend not found: {0}")]
    NotFound(String),

    #[error("Backend already running: {0}")]
    AlreadyRunning(String),

    #[error("Backend not running: {0}")]
    NotRunning(String),

    #[error("Backend disabled: {0}")]
    Disabled(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start backend: {0}")]
    StartFailed(String),
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::StartFailed(_) => Self::Internal(err.to_string()),
            _ => Self::InvalidRequest(err.to_string()),
        }
    }
}

/// Snapshot of one backend's configuration and runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    pub id: String,
    pub name: String,
    pub server_type: BackendServerType,
    pub enabled: bool,
    pub auto_start: bool,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A running backend's handle, lent out for one call.
#[derive(Clone)]
pub struct LiveConnection {
    pub server_id: String,
    pub server_name: String,
    pub connection: Arc<dyn BackendConnection>,
}

impl std::fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection")
            .field("server_id", &self.server_id)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Runtime state of one configured backend.
struct ConnectionState {
    config: BackendServer,
    status: ConnectionStatus,
    last_error: Option<String>,
    handle: Option<Arc<dyn BackendConnection>>,
    watcher: Option<AbortHandle>,
}

impl ConnectionState {
    fn new(config: BackendServer) -> Self {
        Self {
            config,
            status: ConnectionStatus::Stopped,
            last_error: None,
            handle: None,
            watcher: None,
        }
    }

    /// Take the live handle and stop watching it.
    fn release(&mut self) -> Option<Arc<dyn BackendConnection>> {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.handle.take()
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            server_type: self.config.server_type,
            enabled: self.config.enabled,
            auto_start: self.config.auto_start,
            status: self.status,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Default)]
struct Entries {
    /// Enumeration order for discovery.
    order: Vec<String>,
    by_id: HashMap<String, ConnectionState>,
}

impl Entries {
    fn ordered(&self) -> impl Iterator<Item = &ConnectionState> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

/// Owns the set of backend connections keyed by server id.
pub struct ConnectionRegistry {
    entries: Arc<RwLock<Entries>>,
    factory: Arc<dyn ConnectionFactory>,
    emitter: Arc<dyn GatewayEventEmitter>,
    startup_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        emitter: Arc<dyn GatewayEventEmitter>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            factory,
            emitter,
            startup_timeout,
        }
    }

    /// Status of one backend.
    pub async fn get(&self, id: &str) -> Result<BackendInfo, RegistryError> {
        self.entries
            .read()
            .await
            .by_id
            .get(id)
            .map(ConnectionState::info)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Status of the backend with the given display name.
    pub async fn get_by_name(&self, name: &str) -> Result<BackendInfo, RegistryError> {
        self.entries
            .read()
            .await
            .ordered()
            .find(|s| s.config.name == name)
            .map(ConnectionState::info)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All backends in enumeration order.
    pub async fn list(&self) -> Vec<BackendInfo> {
        self.entries
            .read()
            .await
            .ordered()
            .map(ConnectionState::info)
            .collect()
    }

    /// Register a backend config, or replace the config of a known id.
    ///
    /// Replacing keeps the current connection; the new config applies on
    /// the next start.
    pub async fn add(&self, config: BackendServer) -> Result<String, RegistryError> {
        if config.id.is_empty() {
            return Err(RegistryError::InvalidConfig("server id cannot be empty".into()));
        }
        if config.name.is_empty() || config.name.contains(['/', ':']) {
            return Err(RegistryError::InvalidConfig(format!(
                "server name must be non-empty and free of '/' and ':': {:?}",
                config.name
            )));
        }

        let mut entries = self.entries.write().await;
        if let Some(other) = entries
            .ordered()
            .find(|s| s.config.name == config.name && s.config.id != config.id)
        {
            return Err(RegistryError::InvalidConfig(format!(
                "server name {:?} already used by {}",
                config.name, other.config.id
            )));
        }

        let id = config.id.clone();
        match entries.by_id.get_mut(&id) {
            Some(state) => state.config = config,
            None => {
                entries.order.push(id.clone());
                entries.by_id.insert(id.clone(), ConnectionState::new(config));
            }
        }
        Ok(id)
    }

    /// Forget a backend, tearing down its connection. Returns whether it
    /// was known.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut entries = self.entries.write().await;
            entries.order.retain(|o| o != id);
            entries.by_id.remove(id)
        };

        let Some(mut state) = removed else {
            return false;
        };
        if let Some(handle) = state.release() {
            handle.close().await;
            self.emitter
                .emit(GatewayEvent::backend_stopped(id, &state.config.name));
        }
        tracing::info!(server_id = %id, server_name = %state.config.name, "Backend removed");
        true
    }

    /// Set the lifecycle state of a backend.
    ///
    /// A live handle only exists in `running`; moving to any other state
    /// closes it.
    pub async fn set_state(
        &self,
        id: &str,
        status: ConnectionStatus,
        last_error: Option<String>,
    ) -> Result<(), RegistryError> {
        let dropped = {
            let mut entries = self.entries.write().await;
            let state = entries
                .by_id
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            if status == ConnectionStatus::Running && state.handle.is_none() {
                return Err(RegistryError::NotRunning(id.to_string()));
            }
            state.status = status;
            state.last_error = last_error;
            if status == ConnectionStatus::Running {
                None
            } else {
                state.release()
            }
        };

        if let Some(handle) = dropped {
            handle.close().await;
        }
        Ok(())
    }

    /// Handles of every running backend, in enumeration order.
    pub async fn all_live(&self) -> Vec<LiveConnection> {
        self.entries
            .read()
            .await
            .ordered()
            .filter(|s| s.status == ConnectionStatus::Running)
            .filter_map(|s| {
                s.handle.as_ref().map(|handle| LiveConnection {
                    server_id: s.config.id.clone(),
                    server_name: s.config.name.clone(),
                    connection: handle.clone(),
                })
            })
            .collect()
    }

    /// Handle of one backend, if it is running.
    pub async fn connection(&self, id: &str) -> Result<LiveConnection, RegistryError> {
        let entries = self.entries.read().await;
        let state = entries
            .by_id
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        match (&state.status, &state.handle) {
            (ConnectionStatus::Running, Some(handle)) => Ok(LiveConnection {
                server_id: state.config.id.clone(),
                server_name: state.config.name.clone(),
                connection: handle.clone(),
            }),
            _ => Err(RegistryError::NotRunning(id.to_string())),
        }
    }

    /// Connect a backend and mark it running.
    pub async fn start(&self, id: &str) -> Result<BackendInfo, RegistryError> {
        let config = {
            let mut entries = self.entries.write().await;
            let state = entries
                .by_id
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            if !state.config.enabled {
                return Err(RegistryError::Disabled(id.to_string()));
            }
            if matches!(
                state.status,
                ConnectionStatus::Running | ConnectionStatus::Starting
            ) {
                return Err(RegistryError::AlreadyRunning(id.to_string()));
            }
            state.status = ConnectionStatus::Starting;
            state.last_error = None;
            state.config.clone()
        };

        let connection = match self.connect(&config).await {
            Ok(connection) => connection,
            Err(e) => {
                self.record_failure(id, &config.name, &e).await;
                return Err(e);
            }
        };

        let tool_count = match tokio::time::timeout(self.startup_timeout, connection.list_tools())
            .await
        {
            Ok(Ok(tools)) => tools.len(),
            Ok(Err(e)) => {
                tracing::debug!(server_id = %id, error = %e, "Initial tool listing failed");
                0
            }
            Err(_) => 0,
        };

        let info = {
            let mut entries = self.entries.write().await;
            match entries.by_id.get_mut(id) {
                Some(state) if state.status == ConnectionStatus::Starting => {
                    state.status = ConnectionStatus::Running;
                    state.handle = Some(connection.clone());
                    state.watcher = Some(self.watch_exit(id, &config.name, connection.clone()));
                    Some(state.info())
                }
                _ => None,
            }
        };

        let Some(info) = info else {
            // Stopped or removed while connecting.
            connection.close().await;
            return Err(RegistryError::NotRunning(id.to_string()));
        };

        tracing::info!(
            server_id = %id,
            server_name = %config.name,
            tool_count,
            "Backend started"
        );
        self.emitter
            .emit(GatewayEvent::backend_started(id, &config.name, tool_count));
        Ok(info)
    }

    /// Move the backend to `error` once `connection` dies, unless it was
    /// stopped or replaced first.
    fn watch_exit(
        &self,
        id: &str,
        name: &str,
        connection: Arc<dyn BackendConnection>,
    ) -> AbortHandle {
        let entries = self.entries.clone();
        let emitter = self.emitter.clone();
        let (id, name) = (id.to_string(), name.to_string());

        tokio::spawn(async move {
            let reason = connection.closed().await;
            let lost = {
                let mut entries = entries.write().await;
                match entries.by_id.get_mut(&id) {
                    Some(state)
                        if state.status == ConnectionStatus::Running
                            && state
                                .handle
                                .as_ref()
                                .is_some_and(|h| Arc::ptr_eq(h, &connection)) =>
                    {
                        state.status = ConnectionStatus::Error;
                        state.last_error = Some(reason.clone());
                        state.watcher = None;
                        state.handle.take()
                    }
                    _ => None,
                }
            };
            let Some(handle) = lost else {
                return;
            };

            handle.close().await;
            tracing::warn!(server_id = %id, server_name = %name, error = %reason, "Backend connection lost");
            emitter.emit(GatewayEvent::backend_error(&id, &name, reason));
        })
        .abort_handle()
    }

    async fn connect(
        &self,
        config: &BackendServer,
    ) -> Result<Arc<dyn BackendConnection>, RegistryError> {
        let resolved = resolve_inputs(config).map_err(RegistryError::InvalidConfig)?;
        resolved.validate().map_err(RegistryError::InvalidConfig)?;

        match tokio::time::timeout(self.startup_timeout, self.factory.connect(&resolved)).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(RegistryError::StartFailed(e.message)),
            Err(_) => Err(RegistryError::StartFailed(format!(
                "no response within {}s",
                self.startup_timeout.as_secs()
            ))),
        }
    }

    async fn record_failure(&self, id: &str, name: &str, error: &RegistryError) {
        {
            let mut entries = self.entries.write().await;
            if let Some(state) = entries.by_id.get_mut(id) {
                state.status = ConnectionStatus::Error;
                state.last_error = Some(error.to_string());
            }
        }
        tracing::warn!(server_id = %id, server_name = %name, error = %error, "Backend failed to start");
        self.emitter
            .emit(GatewayEvent::backend_error(id, name, error.to_string()));
    }

    /// Disconnect a backend.
    pub async fn stop(&self, id: &str) -> Result<BackendInfo, RegistryError> {
        let (handle, name) = {
            let mut entries = self.entries.write().await;
            let state = entries
                .by_id
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            if !matches!(
                state.status,
                ConnectionStatus::Running | ConnectionStatus::Starting
            ) {
                return Err(RegistryError::NotRunning(id.to_string()));
            }
            state.status = ConnectionStatus::Stopping;
            (state.release(), state.config.name.clone())
        };

        if let Some(handle) = handle {
            handle.close().await;
        }

        let info = {
            let mut entries = self.entries.write().await;
            let state = entries
                .by_id
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            state.status = ConnectionStatus::Stopped;
            state.info()
        };

        tracing::info!(server_id = %id, server_name = %name, "Backend stopped");
        self.emitter.emit(GatewayEvent::backend_stopped(id, &name));
        Ok(info)
    }

    /// Stop every running backend.
    pub async fn stop_all(&self) {
        let running: Vec<String> = self
            .list()
            .await
            .into_iter()
            .filter(|b| b.status == ConnectionStatus::Running)
            .map(|b| b.id)
            .collect();

        for id in running {
            if let Err(e) = self.stop(&id).await {
                tracing::warn!(server_id = %id, error = %e, "Failed to stop backend");
            }
        }
    }

    /// Reconcile with the stored configs.
    ///
    /// Unknown ids are torn down, new ids are added, known ids get their
    /// config replaced. Returns the ids that were added.
    pub async fn sync(&self, configs: Vec<BackendServer>) -> Vec<String> {
        let known: Vec<String> = self.entries.read().await.order.clone();

        for id in &known {
            if !configs.iter().any(|c| &c.id == id) {
                self.remove(id).await;
            }
        }

        let mut added = Vec::new();
        let mut order = Vec::with_capacity(configs.len());
        for config in configs {
            let is_new = !known.contains(&config.id);
            match self.add(config).await {
                Ok(id) => {
                    if is_new {
                        added.push(id.clone());
                    }
                    order.push(id);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping backend config"),
            }
        }

        self.entries.write().await.order = order;
        added
    }
}
