//! Axum web adapter for the conflux gateway.
//!
//! Serves the JSON-RPC endpoint at `/mcp` and the management API under
//! `/api`. [`bootstrap`] is the composition root; handlers only talk to
//! the services it wires.

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod state;

pub use bootstrap::{
    CorsConfig, GatewayContext, GatewayDeps, SeedFile, ServerConfig, assemble, bootstrap,
    start_server,
};
pub use error::{GatewayHttpError, HttpError};
pub use routes::create_router;
pub use sse::SseBroadcaster;
pub use state::AppState;
