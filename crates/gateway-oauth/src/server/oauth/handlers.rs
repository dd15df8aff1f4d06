//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 6749: Authorization endpoint and token endpoint

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::pkce;
use super::request::{parse_basic_auth, parse_token_body};
use super::types::{AuthorizationRequest, AuthorizeResponse, TokenResponse};
use crate::config::ClientAuthMethod;
use crate::error::OAuthError;
use crate::server::transport::HttpState;

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
///
/// Tells clients where to find the authorization server for this resource.
pub async fn handle_protected_resource(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.base_url,
        "authorization_servers": [state.base_url],
        "bearer_methods_supported": ["header"],
        "scopes_supported": state.oauth.client().supported_scopes,
    }))
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
///
/// Describes the endpoints and the grants the registered client may use.
pub async fn handle_auth_server_metadata(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let client = state.oauth.client();

    let mut grant_types = vec!["authorization_code"];
    if client.issue_refresh_tokens {
        grant_types.push("refresh_token");
    }
    if client.auth_method != ClientAuthMethod::None {
        grant_types.push("client_credentials");
    }

    Json(serde_json::json!({
        "issuer": state.base_url,
        "authorization_endpoint": format!("{}/auth", state.base_url),
        "token_endpoint": format!("{}/token", state.base_url),
        "scopes_supported": client.supported_scopes,
        "response_types_supported": ["code"],
        "grant_types_supported": grant_types,
        "token_endpoint_auth_methods_supported": [client.auth_method.as_str()],
        "code_challenge_methods_supported": [pkce::METHOD_S256],
    }))
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /auth`
///
/// There is no interactive consent step: a request that passes validation is
/// approved and redirected back with a code.
pub async fn handle_authorize(
    State(state): State<Arc<HttpState>>,
    query: Result<Query<AuthorizationRequest>, QueryRejection>,
) -> Response {
    let Ok(Query(request)) = query else {
        return error_response(&OAuthError::invalid_request("Malformed query string"));
    };

    match state.oauth.authorize(&request).await {
        AuthorizeResponse::Redirect(location) => {
            let Ok(location) = HeaderValue::from_str(&location) else {
                return error_response(&OAuthError::internal("redirect location is not a valid header"));
            };
            let mut response = StatusCode::FOUND.into_response();
            let headers = response.headers_mut();
            headers.insert(header::LOCATION, location);
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        AuthorizeResponse::Direct(err) => error_response(&err),
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /token`
///
/// Accepts form-encoded or JSON bodies. Client credentials may also arrive
/// through HTTP Basic authentication.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());

    let request = match parse_token_body(content_type, &body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    let basic = match parse_basic_auth(authorization) {
        Ok(basic) => basic,
        Err(err) => return error_response(&err),
    };

    match state.oauth.token(&request, basic).await {
        Ok(tokens) => token_success(&tokens),
        Err(err) => error_response(&err),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(tokens: &TokenResponse) -> Response {
    no_store(Json(tokens).into_response())
}

/// JSON error body with the status the error maps to.
pub(crate) fn error_response(err: &OAuthError) -> Response {
    no_store((err.status(), Json(err.to_json())).into_response())
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
