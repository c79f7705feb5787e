//! HTTP request handlers for the Axum web server.
//!
//! Each submodule covers one API area. Handlers are thin wrappers over
//! the gateway services held in [`crate::state::AppState`].

pub mod audit;
pub mod backends;
pub mod capabilities;
pub mod events;
pub mod hooks;
pub mod mcp;
pub mod workflows;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

/// Raw `Authorization` header value, if present and readable.
pub(crate) fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}
