//! Request authentication for protected gateway routes.
//!
//! Two credentials are accepted. A pre-shared `X-API-Key` is checked first;
//! when none is presented the request must carry an OAuth bearer token
//! issued by the embedded authorization server.

use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::oauth::secure::constant_time_eq_str;
use super::oauth::types::AuthenticatedSession;
use super::transport::HttpState;

/// Header carrying the pre-shared API key.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Result of checking a request for an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyOutcome {
    /// No key header, or no key configured. Fall through to bearer auth.
    NotPresented,
    Accepted,
    Rejected,
}

/// Compares a presented API key against the single configured value.
#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    key: Option<String>,
}

impl ApiKeyAuthenticator {
    #[must_use]
    pub fn new(key: Option<String>) -> Self {
        Self { key: key.filter(|k| !k.is_empty()) }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    #[must_use]
    pub fn check(&self, headers: &HeaderMap) -> ApiKeyOutcome {
        let Some(expected) = self.key.as_deref() else {
            return ApiKeyOutcome::NotPresented;
        };
        let Some(presented) = headers.get(&API_KEY_HEADER) else {
            return ApiKeyOutcome::NotPresented;
        };
        match presented.to_str() {
            Ok(presented) if constant_time_eq_str(presented, expected) => ApiKeyOutcome::Accepted,
            _ => ApiKeyOutcome::Rejected,
        }
    }
}

impl std::fmt::Debug for ApiKeyAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuthenticator").field("enabled", &self.is_enabled()).finish()
    }
}

/// The caller identity, stored in request extensions by [`require_auth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Authenticated {
    ApiKey,
    #[serde(rename = "oauth")]
    OAuth(AuthenticatedSession),
}

/// Middleware guarding routes that need an authenticated caller.
pub async fn require_auth(
    State(state): State<Arc<HttpState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match state.api_key.check(req.headers()) {
        ApiKeyOutcome::Accepted => {
            req.extensions_mut().insert(Authenticated::ApiKey);
            return next.run(req).await;
        }
        ApiKeyOutcome::Rejected => {
            tracing::warn!(path = %req.uri().path(), "Rejected API key");
            return unauthorized_response(&state.base_url, "Invalid API key");
        }
        ApiKeyOutcome::NotPresented => {}
    }

    let authorization = req.headers().get(header::AUTHORIZATION).and_then(|h| h.to_str().ok());
    match state.oauth.validate_bearer(authorization).await {
        Some(session) => {
            tracing::debug!(client_id = %session.client_id, "Bearer token validated");
            req.extensions_mut().insert(Authenticated::OAuth(session));
            next.run(req).await
        }
        None => {
            tracing::debug!(path = %req.uri().path(), "Missing or invalid bearer token");
            unauthorized_response(&state.base_url, "Authentication required")
        }
    }
}

/// 401 pointing the client at the protected resource metadata (RFC 9728 §5.1).
fn unauthorized_response(base_url: &str, description: &str) -> Response {
    let challenge =
        format!("Bearer resource_metadata=\"{base_url}/.well-known/oauth-protected-resource\"");
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "invalid_token",
            "error_description": description,
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// `GET /whoami`
pub async fn handle_whoami(Extension(caller): Extension<Authenticated>) -> impl IntoResponse {
    Json(caller)
}
