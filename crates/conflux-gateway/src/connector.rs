//! Spawning and dialing backends.
//!
//! [`resolve_inputs`] expands `${input:NAME}` placeholders from the server's
//! declared input parameters; [`ProcessConnectionFactory`] then starts a
//! stdio process or opens an HTTP session and runs the handshake.

use std::sync::Arc;

use async_trait::async_trait;

use conflux_core::ports::{BackendConnection, BackendError, ConnectionFactory};
use conflux_core::{BackendServer, BackendServerType};

use crate::client::{Handshake, HttpTransport, RpcConnection, SpawnSpec, StdioTransport};
use crate::config::GatewayConfig;
use crate::path;

const INPUT_PREFIX: &str = "${input:";

/// Expand `${input:NAME}` in one string.
///
/// Values come from `input_values`, falling back to the parameter's
/// default. A declared optional parameter without either expands to the
/// empty string; a required one, or an undeclared name, is an error.
pub fn substitute_inputs(text: &str, server: &BackendServer) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(INPUT_PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + INPUT_PREFIX.len()..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("Unterminated input placeholder in {text:?}"))?;
        let name = &after[..end];
        out.push_str(&input_value(name, server)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn input_value(name: &str, server: &BackendServer) -> Result<String, String> {
    if let Some(value) = server.input_values.get(name) {
        return Ok(value.clone());
    }
    let param = server
        .input_params
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| format!("Undeclared input parameter: {name}"))?;
    match (&param.default, param.required) {
        (Some(default), _) => Ok(default.clone()),
        (None, true) => Err(format!("Missing value for required input: {name}")),
        (None, false) => Ok(String::new()),
    }
}

/// Copy of `server` with every placeholder in args, env, URL and bearer
/// credential expanded.
pub fn resolve_inputs(server: &BackendServer) -> Result<BackendServer, String> {
    let mut resolved = server.clone();
    let config = &mut resolved.config;

    if let Some(args) = &mut config.args {
        for arg in args.iter_mut() {
            *arg = substitute_inputs(arg, server)?;
        }
    }
    for field in [
        &mut config.command,
        &mut config.working_dir,
        &mut config.url,
        &mut config.bearer_token,
    ] {
        if let Some(value) = field {
            *value = substitute_inputs(value, server)?;
        }
    }
    for entry in &mut resolved.env {
        entry.value = substitute_inputs(&entry.value, server)?;
    }

    Ok(resolved)
}

/// Connection factory for real backends.
///
/// Expects configs that already went through [`resolve_inputs`].
pub struct ProcessConnectionFactory {
    handshake: Handshake,
    http: reqwest::Client,
}

impl ProcessConnectionFactory {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            handshake: Handshake {
                protocol_version: config.protocol_version.clone(),
                client_name: config.server_name.clone(),
                client_version: config.server_version.clone(),
            },
            http: reqwest::Client::new(),
        }
    }

    fn spawn_stdio(&self, server: &BackendServer) -> Result<StdioTransport, BackendError> {
        let config = &server.config;
        let command = config
            .command
            .as_deref()
            .ok_or_else(|| BackendError::transport("Stdio server requires command"))?;
        let program = path::resolve_command(command, config.path_extra.as_deref())
            .map_err(BackendError::transport)?;

        if let Some(cwd) = config.working_dir.as_deref().filter(|c| !c.is_empty()) {
            path::validate_working_dir(cwd).map_err(BackendError::transport)?;
        }

        let env: Vec<(String, String)> = server
            .env
            .iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect();
        let args = config.args.clone().unwrap_or_default();

        let spec = SpawnSpec {
            program: &program,
            args: &args,
            cwd: config.working_dir.as_deref().filter(|c| !c.is_empty()),
            path: path::build_effective_path(Some(&program), config.path_extra.as_deref()),
            env: &env,
        };
        StdioTransport::spawn(server.name.clone(), &spec)
    }
}

#[async_trait]
impl ConnectionFactory for ProcessConnectionFactory {
    async fn connect(
        &self,
        server: &BackendServer,
    ) -> Result<Arc<dyn BackendConnection>, BackendError> {
        server.validate().map_err(BackendError::transport)?;

        let transport: Arc<dyn crate::client::RpcTransport> = match server.server_type {
            BackendServerType::Stdio => Arc::new(self.spawn_stdio(server)?),
            BackendServerType::Http => {
                let url = server
                    .config
                    .url
                    .clone()
                    .ok_or_else(|| BackendError::transport("HTTP server requires url"))?;
                Arc::new(HttpTransport::new(
                    server.name.clone(),
                    self.http.clone(),
                    url,
                    server.config.bearer_token.clone(),
                ))
            }
        };

        let connection =
            RpcConnection::initialize(server.name.clone(), transport, &self.handshake).await?;
        Ok(Arc::new(connection))
    }
}
