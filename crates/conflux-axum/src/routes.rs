//! Route definitions and router construction.
//!
//! `/mcp` carries the JSON-RPC protocol. Management endpoints live under
//! `/api` and answer plain JSON.

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bootstrap::CorsConfig;
use crate::handlers;
use crate::state::AppState;

/// Build CORS layer from configuration.
fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            use axum::http::HeaderValue;
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// Management routes without the `/api` prefix.
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        // Backends
        .route(
            "/backends",
            get(handlers::backends::list).post(handlers::backends::upsert),
        )
        .route(
            "/backends/{id}",
            get(handlers::backends::get).delete(handlers::backends::remove),
        )
        .route("/backends/{id}/start", post(handlers::backends::start))
        .route("/backends/{id}/stop", post(handlers::backends::stop))
        // Hooks
        .route(
            "/hooks",
            get(handlers::hooks::list).post(handlers::hooks::create),
        )
        .route(
            "/hooks/{id}",
            put(handlers::hooks::update).delete(handlers::hooks::remove),
        )
        // Workflows
        .route(
            "/workflows",
            get(handlers::workflows::list).post(handlers::workflows::save),
        )
        .route(
            "/workflows/{id}",
            get(handlers::workflows::get)
                .put(handlers::workflows::update)
                .delete(handlers::workflows::remove),
        )
        .route(
            "/workflows/{id}/activate",
            post(handlers::workflows::activate),
        )
        .route(
            "/workflows/{id}/deactivate",
            post(handlers::workflows::deactivate),
        )
        // Aggregated capabilities, same view as the protocol endpoint
        .route("/tools", get(handlers::capabilities::tools))
        .route("/tools/call", post(handlers::capabilities::call_tool))
        .route("/prompts", get(handlers::capabilities::prompts))
        .route("/prompts/get", post(handlers::capabilities::get_prompt))
        .route("/resources", get(handlers::capabilities::resources))
        .route("/resources/read", post(handlers::capabilities::read_resource))
        .route("/display-rules", put(handlers::capabilities::set_display_rules))
        // Audit and events
        .route("/audit", get(handlers::audit::recent))
        .route("/events", get(handlers::events::stream))
}

/// Create the full router over a shared context.
pub fn create_router(state: AppState, cors_config: &CorsConfig) -> Router {
    let cors = build_cors_layer(cors_config);

    Router::new()
        .route("/health", get(health_check))
        .route("/mcp", post(handlers::mcp::rpc))
        .nest("/api", api_routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub(crate) async fn health_check() -> &'static str {
    "OK"
}
