//! Command-line flags for the `conflux` binary.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use conflux_store::DEFAULT_AUDIT_CAPACITY;

use crate::bootstrap::{CorsConfig, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "conflux", version, about = "Capability aggregation gateway")]
pub struct Cli {
    /// Address to bind
    #[arg(long, env = "CONFLUX_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "CONFLUX_PORT", default_value_t = 8765)]
    pub port: u16,

    /// Seed file with gateway settings, servers, tokens, hooks and workflows
    #[arg(short, long, env = "CONFLUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Append audit entries to this JSON-lines file
    #[arg(long, env = "CONFLUX_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Audit entries kept in memory
    #[arg(long, default_value_t = DEFAULT_AUDIT_CAPACITY)]
    pub audit_capacity: usize,

    /// Allowed CORS origins (comma separated). Any origin when empty.
    #[arg(long = "allow-origin", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "CONFLUX_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            seed_path: self.config.clone(),
            audit_log: self.audit_log.clone(),
            audit_capacity: self.audit_capacity,
            cors: if self.allowed_origins.is_empty() {
                CorsConfig::AllowAll
            } else {
                CorsConfig::AllowOrigins(self.allowed_origins.clone())
            },
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().compact()))
        .try_init()
        .ok(); // Ignore error if already initialized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_build_server_config() {
        let cli = Cli::try_parse_from([
            "conflux",
            "--port",
            "9000",
            "--config",
            "/etc/conflux.json",
            "--allow-origin",
            "http://a,http://b",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);

        let config = cli.server_config();
        assert_eq!(config.port, 9000);
        assert_eq!(config.seed_path, Some(PathBuf::from("/etc/conflux.json")));
        assert!(matches!(
            config.cors,
            CorsConfig::AllowOrigins(ref origins) if origins == &["http://a", "http://b"]
        ));
    }
}
