//! HTTP transport.
//!
//! Wires the OAuth endpoints, metadata documents and protected routes into
//! one axum router.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::{self, ApiKeyAuthenticator};
use super::oauth::{AuthorizationServer, handlers};

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct HttpState {
    pub oauth: AuthorizationServer,
    pub api_key: ApiKeyAuthenticator,
    /// Public base URL used in metadata documents and challenges.
    pub base_url: String,
}

/// Create the HTTP router.
pub fn create_router(oauth: AuthorizationServer, base_url: &str, api_key: Option<String>) -> Router {
    let state = Arc::new(HttpState {
        oauth,
        api_key: ApiKeyAuthenticator::new(api_key),
        base_url: base_url.trim_end_matches('/').to_string(),
    });

    let protected = Router::new()
        .route("/whoami", get(auth::handle_whoami))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), auth::require_auth));

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        // OAuth 2.1 authorization server
        .route("/auth", get(handlers::handle_authorize))
        .route("/token", post(handlers::handle_token))
        .route(
            "/.well-known/oauth-authorization-server",
            get(handlers::handle_auth_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::handle_protected_resource),
        )
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "gateway-oauth",
        "version": env!("CARGO_PKG_VERSION"),
        "authorization_codes": state.oauth.code_count().await,
        "sessions": state.oauth.session_count().await,
    }))
}
