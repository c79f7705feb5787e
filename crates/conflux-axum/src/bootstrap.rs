//! Axum server bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together
//! for the web adapter. All concrete implementations are instantiated here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use conflux_core::ports::{AuditSink, ConnectionFactory, GatewayEventEmitter, Stores};
use conflux_gateway::{AggregationGateway, GatewayConfig, ProcessConnectionFactory};
use conflux_store::{
    DEFAULT_AUDIT_CAPACITY, FanoutAuditSink, JsonLinesAuditSink, MemoryAuditSink, MemoryStore,
    Seed,
};

use crate::sse::SseBroadcaster;
use crate::state::AppState;

/// CORS configuration for the web server.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins (development mode).
    #[default]
    AllowAll,
    /// Allow specific origins (production mode).
    AllowOrigins(Vec<String>),
}

/// Server configuration for the Axum adapter.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seed file with gateway settings and initial configuration.
    pub seed_path: Option<PathBuf>,
    /// Also append audit entries to this JSON-lines file.
    pub audit_log: Option<PathBuf>,
    /// Entries kept in memory for `/api/audit`.
    pub audit_capacity: usize,
    pub cors: CorsConfig,
}

impl ServerConfig {
    pub fn with_defaults() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            seed_path: None,
            audit_log: None,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            cors: CorsConfig::default(),
        }
    }

    #[must_use]
    pub fn with_seed(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_path = Some(path.into());
        self
    }

    /// Set CORS to allow specific origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The seed file: gateway settings next to the store seed.
///
/// ```json
/// { "gateway": { "requireAuth": true }, "servers": [], "tokens": [] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(flatten)]
    pub store: Seed,
}

impl SeedFile {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid seed file")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Application context for the Axum adapter.
pub struct GatewayContext {
    pub gateway: Arc<AggregationGateway>,
    /// Writable side of the configuration store.
    pub store: Arc<MemoryStore>,
    /// SSE broadcaster for lifecycle events.
    pub sse: Arc<SseBroadcaster>,
}

/// Everything [`assemble`] needs; tests swap the factory and sinks.
pub struct GatewayDeps {
    pub config: GatewayConfig,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<dyn AuditSink>,
    pub factory: Arc<dyn ConnectionFactory>,
}

/// Wire the gateway over `deps`, follow store changes and run the
/// initial load.
pub async fn assemble(deps: GatewayDeps) -> Result<GatewayContext> {
    let sse = Arc::new(SseBroadcaster::with_defaults());
    let stores = Stores::from_single(deps.store.clone(), deps.audit);
    let gateway = Arc::new(AggregationGateway::new(
        deps.config,
        stores,
        deps.factory,
        sse.clone() as Arc<dyn GatewayEventEmitter>,
    ));

    // Subscribe before the initial load so no change is missed.
    gateway.spawn_change_listener();
    gateway
        .init()
        .await
        .context("Failed to load gateway configuration")?;

    Ok(GatewayContext {
        gateway,
        store: deps.store,
        sse,
    })
}

/// Bootstrap the gateway with real backends and the configured sinks.
pub async fn bootstrap(config: &ServerConfig) -> Result<GatewayContext> {
    let seed = match &config.seed_path {
        Some(path) => SeedFile::load(path).await?,
        None => SeedFile::default(),
    };
    tracing::info!(
        seed = ?config.seed_path,
        servers = seed.store.servers.len(),
        tokens = seed.store.tokens.len(),
        hooks = seed.store.hooks.len(),
        workflows = seed.store.workflows.len(),
        require_auth = seed.gateway.require_auth,
        "Configuration loaded"
    );

    // The memory sink goes first: it answers `recent`.
    let memory_audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new(config.audit_capacity));
    let audit: Arc<dyn AuditSink> = match &config.audit_log {
        Some(path) => {
            let file: Arc<dyn AuditSink> = Arc::new(
                JsonLinesAuditSink::open(path)
                    .await
                    .with_context(|| format!("Failed to open audit log {}", path.display()))?,
            );
            tracing::info!(path = %path.display(), "Writing audit log");
            Arc::new(FanoutAuditSink::new(vec![memory_audit, file]))
        }
        None => memory_audit,
    };

    let factory = Arc::new(ProcessConnectionFactory::new(&seed.gateway));
    assemble(GatewayDeps {
        config: seed.gateway,
        store: Arc::new(MemoryStore::from_seed(seed.store)),
        audit,
        factory,
    })
    .await
}

/// Serve until Ctrl-C, then stop every backend.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let ctx: AppState = Arc::new(bootstrap(&config).await?);
    let app = crate::routes::create_router(ctx.clone(), &config.cors);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "conflux gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_file_splits_gateway_settings() {
        let seed = SeedFile::from_json(
            r#"{
                "gateway": { "requireAuth": true, "backendCallTimeoutMs": 1500 },
                "servers": [{ "id": "fs", "name": "filesystem" }],
                "displayRules": []
            }"#,
        )
        .unwrap();
        assert!(seed.gateway.require_auth);
        assert_eq!(
            seed.gateway.backend_call_timeout,
            std::time::Duration::from_millis(1500)
        );
        assert_eq!(seed.store.servers[0].name, "filesystem");
    }

    #[test]
    fn test_empty_seed_uses_defaults() {
        let seed = SeedFile::from_json("{}").unwrap();
        assert_eq!(seed.gateway, GatewayConfig::default());
        assert!(seed.store.servers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_seed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SeedFile::load(&dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read seed file"));
    }
}
