//! Error types for the gateway OAuth server.
//!
//! Uses `thiserror` for structured error handling. Every failure that can
//! reach the transport boundary is an [`OAuthError`], whose variants map
//! one-to-one onto the OAuth 2.0 error vocabulary.

use axum::http::StatusCode;

/// Generic description used in place of internal failure detail.
const INTERNAL_DESCRIPTION: &str = "internal server error";

/// Errors produced by the authorization and token endpoints.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// Malformed or missing request parameters.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Client identification or authentication failed.
    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// Authorization code or refresh token is invalid, expired, or was
    /// issued to another client.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// The client is not allowed to use the requested grant.
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// The grant type is not supported by this server.
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// Requested scope is unknown or exceeds the granted scope.
    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    /// Unexpected failure. The detail is logged, never returned to callers.
    #[error("internal_server_error: {0}")]
    Internal(String),
}

impl OAuthError {
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::InvalidClient(description.into())
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant(description.into())
    }

    #[must_use]
    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::UnauthorizedClient(description.into())
    }

    #[must_use]
    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::UnsupportedGrantType(description.into())
    }

    #[must_use]
    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::InvalidScope(description.into())
    }

    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// The `error` field value sent on the wire.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::Internal(_) => "internal_server_error",
        }
    }

    /// The `error_description` field value sent on the wire.
    ///
    /// Internal errors always yield a fixed generic string.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::InvalidScope(d) => d,
            Self::Internal(_) => INTERNAL_DESCRIPTION,
        }
    }

    /// HTTP status for a direct (non-redirect) error response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Returns true if this error is an unexpected server-side failure.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// JSON body `{error, error_description}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code(),
            "error_description": self.description(),
        })
    }
}

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is missing.
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    /// A value is present but unusable.
    #[error("invalid configuration value for {key}: {message}")]
    Invalid {
        /// Configuration key
        key: &'static str,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { key, message: message.into() }
    }
}

/// Result type alias for OAuth operations.
pub type OAuthResult<T> = Result<T, OAuthError>;
