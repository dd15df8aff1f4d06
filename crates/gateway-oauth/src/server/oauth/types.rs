//! OAuth 2.0 types for gateway authentication.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OAuthError;

/// An authorization code issued by the authorization endpoint.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeRecord {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCodeRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A token session, keyed by its current access token.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    /// `None` with a refresh token present means the refresh token never expires.
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl Session {
    #[must_use]
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True only when a refresh expiry exists and has passed.
    #[must_use]
    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at.is_some_and(|at| now >= at)
    }

    /// True if the session can still be renewed through the refresh grant.
    #[must_use]
    pub fn is_refreshable(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some() && !self.is_refresh_expired(now)
    }

    /// A session is dead once it can serve neither bearer validation nor refresh.
    #[must_use]
    pub fn is_dead(&self, now: DateTime<Utc>) -> bool {
        self.is_refresh_expired(now) || (self.is_access_expired(now) && !self.is_refreshable(now))
    }
}

/// The identity behind a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedSession {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticatedSession {
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl From<&Session> for AuthenticatedSession {
    fn from(session: &Session) -> Self {
        Self {
            client_id: session.client_id.clone(),
            scopes: session.scopes.clone(),
            expires_at: session.expires_at,
        }
    }
}

/// Query parameters of `GET /auth`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Body of `POST /token`, form-encoded or JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

/// Client credentials decoded from an HTTP Basic `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials").field("client_id", &self.client_id).finish()
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl TokenResponse {
    pub(crate) fn for_session(session: &Session, expires_in: u64) -> Self {
        Self {
            access_token: session.access_token.clone(),
            token_type: "Bearer",
            expires_in,
            refresh_token: session.refresh_token.clone(),
            scope: session.scopes.join(" "),
        }
    }
}

/// Outcome of the authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeResponse {
    /// 302 to this location; carries either a code or an error.
    Redirect(String),
    /// The redirect URI could not be trusted; answer directly.
    Direct(OAuthError),
}

/// Counts of entries removed by one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_codes: usize,
    pub expired_sessions: usize,
    pub evicted_codes: usize,
    pub evicted_sessions: usize,
}

impl SweepStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.expired_codes + self.expired_sessions + self.evicted_codes + self.evicted_sessions
    }
}

/// `now + seconds`, saturating at the maximum representable instant.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
