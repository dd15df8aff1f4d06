//! The authorization server: request validation, grant handling, bearer
//! validation and the cleanup sweep.
//!
//! All mutable state lives in [`OAuthState`] behind a single
//! `tokio::sync::Mutex`. Every grant performs its lookup, delete and insert
//! under one lock acquisition, so two concurrent refreshes of the same
//! refresh token cannot both succeed.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

use super::pkce;
use super::secure::{self, constant_time_eq_str};
use super::store::{AuthorizationCodeStore, SessionStore};
use super::types::{
    AuthenticatedSession, AuthorizationCodeRecord, AuthorizationRequest, AuthorizeResponse,
    BasicCredentials, Session, SweepStats, TokenRequest, TokenResponse, expiry_after,
};
use crate::config::{ClientAuthMethod, ClientConfiguration, Config, StoreLimits, defaults};
use crate::error::{ConfigError, OAuthError, OAuthResult};

/// Source of the current time. Swappable in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Both stores, guarded together.
#[derive(Debug, Default)]
pub struct OAuthState {
    pub codes: AuthorizationCodeStore,
    pub sessions: SessionStore,
}

impl OAuthState {
    /// Remove expired entries, then re-apply the size bounds.
    pub fn sweep(&mut self, now: DateTime<Utc>, limits: &StoreLimits) -> SweepStats {
        SweepStats {
            expired_codes: self.codes.purge_expired(now),
            expired_sessions: self.sessions.purge_expired(now),
            evicted_codes: self.codes.enforce_bound(limits.max_authorization_codes),
            evicted_sessions: self.sessions.enforce_bound(limits.max_sessions),
        }
    }
}

/// Client identity presented at the token endpoint, merged from the body
/// and an optional Basic header.
struct PresentedClient {
    client_id: Option<String>,
    client_secret: Option<String>,
    via_basic: bool,
}

/// The embedded OAuth 2.1 authorization server.
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct AuthorizationServer {
    client: Arc<ClientConfiguration>,
    limits: StoreLimits,
    state: Arc<Mutex<OAuthState>>,
    clock: Clock,
}

impl AuthorizationServer {
    #[must_use]
    pub fn new(client: ClientConfiguration, limits: StoreLimits) -> Self {
        Self {
            client: Arc::new(client),
            limits,
            state: Arc::new(Mutex::new(OAuthState::default())),
            clock: Arc::new(Utc::now),
        }
    }

    /// Build from a full server configuration, validating it first.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.client.clone(), config.limits))
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn client(&self) -> &ClientConfiguration {
        &self.client
    }

    #[must_use]
    pub const fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn code_count(&self) -> usize {
        self.state.lock().await.codes.len()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    // ─── Authorization endpoint ──────────────────────────────────────────────

    /// Handle `GET /auth`.
    ///
    /// Errors are redirected back to the client only once both `client_id`
    /// and `redirect_uri` have been verified against the configuration;
    /// otherwise they are answered directly.
    pub async fn authorize(&self, request: &AuthorizationRequest) -> AuthorizeResponse {
        self.sweep().await;
        let redirect_target = self.trusted_redirect(request);

        let result = match self.validate_authorization(request) {
            Ok(scopes) => self.issue_code(request, scopes).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(location) => AuthorizeResponse::Redirect(location),
            Err(err) if err.is_internal() => {
                tracing::error!(error = %err, "Authorization request failed");
                AuthorizeResponse::Direct(err)
            }
            Err(err) => {
                tracing::warn!(
                    error = err.code(),
                    description = err.description(),
                    "Rejected authorization request"
                );
                match redirect_target {
                    Some(mut url) => {
                        {
                            let mut query = url.query_pairs_mut();
                            query.append_pair("error", err.code());
                            query.append_pair("error_description", err.description());
                            if let Some(state) = request.state.as_deref() {
                                query.append_pair("state", state);
                            }
                        }
                        AuthorizeResponse::Redirect(url.into())
                    }
                    None => AuthorizeResponse::Direct(err),
                }
            }
        }
    }

    /// The redirect URI, if it may safely receive an error redirect.
    fn trusted_redirect(&self, request: &AuthorizationRequest) -> Option<Url> {
        let client_id = request.client_id.as_deref()?;
        let redirect_uri = request.redirect_uri.as_deref()?;
        // An unknown client never gets a redirect, even to a registered URI.
        if client_id != self.client.client_id
            || !self.client.redirect_uris.iter().any(|u| u == redirect_uri)
        {
            return None;
        }
        Url::parse(redirect_uri).ok()
    }

    /// Checks run in a fixed order; the first failure wins.
    fn validate_authorization(&self, request: &AuthorizationRequest) -> OAuthResult<Vec<String>> {
        if request.response_type.as_deref() != Some("code") {
            return Err(OAuthError::invalid_request("response_type must be 'code'"));
        }

        let Some(client_id) = request.client_id.as_deref() else {
            return Err(OAuthError::invalid_request("Missing client_id"));
        };
        if client_id != self.client.client_id {
            return Err(OAuthError::invalid_client("Unknown client_id"));
        }

        let Some(redirect_uri) = request.redirect_uri.as_deref() else {
            return Err(OAuthError::invalid_request("Missing redirect_uri"));
        };
        if !self.client.redirect_uris.iter().any(|u| u == redirect_uri) {
            return Err(OAuthError::invalid_request("Invalid redirect_uri"));
        }

        if self.client.require_pkce {
            if request.code_challenge.as_deref().is_none_or(str::is_empty) {
                return Err(OAuthError::invalid_request("Missing code_challenge"));
            }
            if request.code_challenge_method.as_deref() != Some(pkce::METHOD_S256) {
                return Err(OAuthError::invalid_request("code_challenge_method must be 'S256'"));
            }
        } else if request.code_challenge.is_some()
            && request.code_challenge_method.as_deref() != Some(pkce::METHOD_S256)
        {
            return Err(OAuthError::invalid_request("code_challenge_method must be 'S256'"));
        }

        self.resolve_scopes(request.scope.as_deref())
    }

    async fn issue_code(
        &self,
        request: &AuthorizationRequest,
        scopes: Vec<String>,
    ) -> OAuthResult<String> {
        // Both values were checked by validate_authorization.
        let client_id = request.client_id.clone().unwrap_or_default();
        let redirect_uri = request.redirect_uri.clone().unwrap_or_default();

        let mut location = Url::parse(&redirect_uri)
            .map_err(|e| OAuthError::internal(format!("registered redirect_uri unparsable: {e}")))?;
        let code = secure::generate_token()?;
        let now = self.now();

        {
            let mut state = self.state.lock().await;
            state.codes.insert(AuthorizationCodeRecord {
                code: code.clone(),
                client_id: client_id.clone(),
                redirect_uri,
                scopes,
                code_challenge: request.code_challenge.clone().filter(|c| !c.is_empty()),
                issued_at: now,
                expires_at: expiry_after(now, defaults::AUTH_CODE_LIFETIME_SECS),
            });
            state.codes.enforce_bound(self.limits.max_authorization_codes);
        }

        tracing::info!(client_id = %client_id, "Issued authorization code");

        {
            let mut query = location.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = request.state.as_deref() {
                query.append_pair("state", state);
            }
        }
        Ok(location.into())
    }

    /// Requested scopes, or the defaults when none are named.
    fn resolve_scopes(&self, requested: Option<&str>) -> OAuthResult<Vec<String>> {
        let requested = parse_scope(requested);
        if requested.is_empty() {
            return Ok(self.client.default_scopes.clone());
        }
        if let Some(unknown) =
            requested.iter().find(|s| !self.client.supported_scopes.contains(s))
        {
            return Err(OAuthError::invalid_scope(format!("Unsupported scope '{unknown}'")));
        }
        Ok(requested)
    }

    // ─── Token endpoint ──────────────────────────────────────────────────────

    /// Handle `POST /token`.
    ///
    /// `basic` carries credentials decoded from an HTTP Basic header, if any.
    pub async fn token(
        &self,
        request: &TokenRequest,
        basic: Option<BasicCredentials>,
    ) -> OAuthResult<TokenResponse> {
        self.sweep().await;
        let grant_type = request.grant_type.as_deref().unwrap_or_default();
        let result = self.dispatch_grant(grant_type, request, basic).await;

        match &result {
            Ok(_) => {}
            Err(err) if err.is_internal() => {
                tracing::error!(grant_type, error = %err, "Token request failed");
            }
            Err(err) => {
                tracing::warn!(
                    grant_type,
                    error = err.code(),
                    description = err.description(),
                    "Rejected token request"
                );
            }
        }
        result
    }

    async fn dispatch_grant(
        &self,
        grant_type: &str,
        request: &TokenRequest,
        basic: Option<BasicCredentials>,
    ) -> OAuthResult<TokenResponse> {
        if grant_type.is_empty() {
            return Err(OAuthError::invalid_request("Missing grant_type"));
        }
        let presented = merge_credentials(request, basic)?;

        match grant_type {
            "authorization_code" => self.authorization_code_grant(request, &presented).await,
            "refresh_token" => self.refresh_token_grant(request, &presented).await,
            "client_credentials" => self.client_credentials_grant(request, &presented).await,
            _ => Err(OAuthError::unsupported_grant_type("Unsupported grant_type")),
        }
    }

    async fn authorization_code_grant(
        &self,
        request: &TokenRequest,
        presented: &PresentedClient,
    ) -> OAuthResult<TokenResponse> {
        let Some(code) = request.code.as_deref() else {
            return Err(OAuthError::invalid_request("Missing code"));
        };
        let Some(client_id) = presented.client_id.as_deref() else {
            return Err(OAuthError::invalid_request("Missing client_id"));
        };

        // Minted up front so that a generator failure leaves the stores untouched.
        let access_token = secure::generate_token()?;
        let refresh_token = self.mint_refresh_token()?;
        let now = self.now();

        let mut state = self.state.lock().await;
        let record = match state.codes.get(code) {
            Some(record) if !record.is_expired(now) => record,
            _ => return Err(OAuthError::invalid_grant("Invalid or expired authorization code")),
        };
        if record.client_id != client_id {
            return Err(OAuthError::invalid_grant("Authorization code was issued to another client"));
        }
        if let Some(redirect_uri) = request.redirect_uri.as_deref() {
            if redirect_uri != record.redirect_uri {
                return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
            }
        }
        self.check_code_verifier(record.code_challenge.as_deref(), request.code_verifier.as_deref())?;
        self.authenticate_client(presented)?;

        let scopes = record.scopes.clone();
        state.codes.remove(code);

        let session = Session {
            access_token,
            client_id: client_id.to_string(),
            scopes,
            issued_at: now,
            expires_at: expiry_after(now, self.client.access_token_lifetime),
            refresh_expires_at: refresh_token
                .as_ref()
                .and_then(|_| self.client.refresh_token_lifetime.map(|s| expiry_after(now, s))),
            refresh_token,
        };
        let response = TokenResponse::for_session(&session, self.client.access_token_lifetime);
        state.sessions.insert(session);
        state.sessions.enforce_bound(self.limits.max_sessions);
        drop(state);

        tracing::info!(client_id = %client_id, "Exchanged authorization code for tokens");
        Ok(response)
    }

    fn check_code_verifier(&self, challenge: Option<&str>, verifier: Option<&str>) -> OAuthResult<()> {
        let failed = || OAuthError::invalid_grant("PKCE verification failed");
        match (challenge, verifier) {
            (Some(challenge), Some(verifier)) => {
                if pkce::verify(challenge, verifier) { Ok(()) } else { Err(failed()) }
            }
            (_, _) if self.client.require_pkce => Err(failed()),
            // PKCE optional: a verifier is only checked when both sides have one.
            _ => Ok(()),
        }
    }

    async fn refresh_token_grant(
        &self,
        request: &TokenRequest,
        presented: &PresentedClient,
    ) -> OAuthResult<TokenResponse> {
        let Some(refresh_token) = request.refresh_token.as_deref() else {
            return Err(OAuthError::invalid_request("Missing refresh_token"));
        };
        let client_id = self.authenticate_client(presented)?;

        let new_access_token = secure::generate_token()?;
        let new_refresh_token = secure::generate_token()?;
        let now = self.now();

        let mut state = self.state.lock().await;
        let matches = state.sessions.find_by_refresh_token(refresh_token, client_id, now);
        if matches.is_empty() {
            return Err(OAuthError::invalid_grant("Invalid or expired refresh token"));
        }

        let Some(chosen) = matches.iter().filter(|m| !m.refresh_expired).max_by_key(|m| m.seq)
        else {
            for m in &matches {
                state.sessions.remove(&m.key);
            }
            return Err(OAuthError::invalid_grant("Invalid or expired refresh token"));
        };

        let granted = state
            .sessions
            .get(&chosen.key)
            .map(|s| s.scopes.clone())
            .ok_or_else(|| OAuthError::internal("matched session vanished under lock"))?;
        let scopes = narrow_scopes(&granted, request.scope.as_deref())?;

        let chosen_key = chosen.key.clone();
        let mut session = None;
        for m in &matches {
            let removed = state.sessions.remove(&m.key);
            if m.key == chosen_key {
                session = removed;
            }
        }
        let mut session =
            session.ok_or_else(|| OAuthError::internal("matched session vanished under lock"))?;

        session.access_token = new_access_token;
        session.refresh_token = Some(new_refresh_token);
        session.scopes = scopes;
        session.issued_at = now;
        session.expires_at = expiry_after(now, self.client.access_token_lifetime);

        let response = TokenResponse::for_session(&session, self.client.access_token_lifetime);
        state.sessions.insert(session);
        state.sessions.enforce_bound(self.limits.max_sessions);
        drop(state);

        tracing::info!(client_id = %client_id, "Refreshed token session");
        Ok(response)
    }

    async fn client_credentials_grant(
        &self,
        request: &TokenRequest,
        presented: &PresentedClient,
    ) -> OAuthResult<TokenResponse> {
        if self.client.auth_method == ClientAuthMethod::None {
            return Err(OAuthError::unauthorized_client(
                "client_credentials requires a confidential client",
            ));
        }
        let client_id = self.authenticate_client(presented)?;
        let scopes = self.resolve_scopes(request.scope.as_deref())?;

        let access_token = secure::generate_token()?;
        let now = self.now();
        let session = Session {
            access_token,
            client_id: client_id.to_string(),
            scopes,
            issued_at: now,
            expires_at: expiry_after(now, self.client.access_token_lifetime),
            refresh_token: None,
            refresh_expires_at: None,
        };
        let response = TokenResponse::for_session(&session, self.client.access_token_lifetime);

        {
            let mut state = self.state.lock().await;
            state.sessions.insert(session);
            state.sessions.enforce_bound(self.limits.max_sessions);
        }

        tracing::info!(client_id = %client_id, "Issued client credentials token");
        Ok(response)
    }

    fn mint_refresh_token(&self) -> OAuthResult<Option<String>> {
        if self.client.issue_refresh_tokens { secure::generate_token().map(Some) } else { Ok(None) }
    }

    /// Check the presented client id and, per the configured method, its secret.
    fn authenticate_client<'a>(&self, presented: &'a PresentedClient) -> OAuthResult<&'a str> {
        let Some(client_id) = presented.client_id.as_deref() else {
            return Err(OAuthError::invalid_client("Missing client credentials"));
        };
        if client_id != self.client.client_id {
            return Err(OAuthError::invalid_client("Unknown client"));
        }

        let failed = || OAuthError::invalid_client("Client authentication failed");
        let secret = match self.client.auth_method {
            ClientAuthMethod::None => return Ok(client_id),
            ClientAuthMethod::ClientSecretBasic if !presented.via_basic => return Err(failed()),
            ClientAuthMethod::ClientSecretPost if presented.via_basic => return Err(failed()),
            _ => presented.client_secret.as_deref().ok_or_else(failed)?,
        };
        let expected = self.client.client_secret.as_deref().ok_or_else(failed)?;
        if constant_time_eq_str(secret, expected) { Ok(client_id) } else { Err(failed()) }
    }

    // ─── Bearer validation ───────────────────────────────────────────────────

    /// Validate an `Authorization` header value of the form `Bearer <token>`.
    pub async fn validate_bearer(&self, header: Option<&str>) -> Option<AuthenticatedSession> {
        let token = header?.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            return None;
        }
        self.validate_access_token(token).await
    }

    /// Look up an access token and return its session if still valid.
    ///
    /// Stale aliases and sessions that can no longer be used are deleted on
    /// the way. An expired access token whose session can still be refreshed
    /// is rejected but kept, so the refresh grant can renew it.
    pub async fn validate_access_token(&self, token: &str) -> Option<AuthenticatedSession> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let session = state.sessions.get(token)?;

        if session.access_token != token {
            state.sessions.remove(token);
            tracing::warn!("Removed stale session alias");
            return None;
        }
        if session.is_dead(now) {
            state.sessions.remove(token);
            return None;
        }
        if session.is_access_expired(now) {
            return None;
        }
        Some(AuthenticatedSession::from(session))
    }

    // ─── Cleanup ─────────────────────────────────────────────────────────────

    /// Run one cleanup sweep now.
    pub async fn sweep(&self) -> SweepStats {
        let now = self.now();
        let stats = self.state.lock().await.sweep(now, &self.limits);
        if stats.total() > 0 {
            tracing::debug!(
                expired_codes = stats.expired_codes,
                expired_sessions = stats.expired_sessions,
                evicted_codes = stats.evicted_codes,
                evicted_sessions = stats.evicted_sessions,
                "Cleaned up OAuth state"
            );
        }
        stats
    }

    /// Start the periodic cleanup sweep.
    ///
    /// The task holds only a weak reference to the stores and ends by itself
    /// once every server clone is dropped. Dropping the returned handle, or
    /// calling [`CleanupHandle::shutdown`], cancels it.
    #[must_use = "dropping the handle stops the cleanup task"]
    pub fn start_cleanup_task(&self) -> CleanupHandle {
        let weak: Weak<Mutex<OAuthState>> = Arc::downgrade(&self.state);
        let limits = self.limits;
        let clock = Arc::clone(&self.clock);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(limits.cleanup_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };
                let stats = state.lock().await.sweep(clock(), &limits);
                if stats.total() > 0 {
                    tracing::debug!(removed = stats.total(), "Periodic OAuth cleanup");
                }
            }
        });

        CleanupHandle { task: Some(task) }
    }

    #[cfg(test)]
    pub(crate) async fn with_state<R>(&self, f: impl FnOnce(&mut OAuthState) -> R) -> R {
        f(&mut *self.state.lock().await)
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("client", &self.client)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Handle to the background cleanup task.
#[derive(Debug)]
pub struct CleanupHandle {
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Cancel the task and wait for it to stop.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::debug!("OAuth cleanup task stopped");
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Merge body credentials with a Basic header. Both sources must agree.
fn merge_credentials(
    request: &TokenRequest,
    basic: Option<BasicCredentials>,
) -> OAuthResult<PresentedClient> {
    let Some(basic) = basic else {
        return Ok(PresentedClient {
            client_id: request.client_id.clone(),
            client_secret: request.client_secret.clone(),
            via_basic: false,
        });
    };

    let conflict = || OAuthError::invalid_client("Conflicting client credentials");
    if request.client_id.as_deref().is_some_and(|id| id != basic.client_id) {
        return Err(conflict());
    }
    if request
        .client_secret
        .as_deref()
        .is_some_and(|secret| !constant_time_eq_str(secret, &basic.client_secret))
    {
        return Err(conflict());
    }

    Ok(PresentedClient {
        client_id: Some(basic.client_id),
        client_secret: Some(basic.client_secret),
        via_basic: true,
    })
}

/// Split a space-delimited scope string, dropping duplicates.
fn parse_scope(scope: Option<&str>) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.unwrap_or_default().split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

/// A refresh may keep or narrow the granted scopes, never widen them.
fn narrow_scopes(granted: &[String], requested: Option<&str>) -> OAuthResult<Vec<String>> {
    let requested = parse_scope(requested);
    if requested.is_empty() {
        return Ok(granted.to_vec());
    }
    if let Some(extra) = requested.iter().find(|s| !granted.contains(s)) {
        return Err(OAuthError::invalid_scope(format!("Scope '{extra}' exceeds the original grant")));
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::TimeDelta;

    use super::*;

    const REDIRECT: &str = "https://app.example/callback";

    fn public_server() -> AuthorizationServer {
        AuthorizationServer::new(
            ClientConfiguration::public("app", vec![REDIRECT.to_string()])
                .with_scopes(&["mcp", "read", "write"], &["mcp"]),
            StoreLimits::default(),
        )
    }

    fn confidential_server(method: ClientAuthMethod) -> AuthorizationServer {
        AuthorizationServer::new(
            ClientConfiguration::confidential("svc", "s3cret", method, vec![REDIRECT.to_string()]),
            StoreLimits::default(),
        )
    }

    /// A clock the test can move forward.
    fn manual_clock() -> (Clock, Arc<StdMutex<DateTime<Utc>>>) {
        let now = Arc::new(StdMutex::new(Utc::now()));
        let handle = Arc::clone(&now);
        (Arc::new(move || *handle.lock().unwrap()), now)
    }

    fn auth_request(challenge: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: Some("code".into()),
            client_id: Some("app".into()),
            redirect_uri: Some(REDIRECT.into()),
            scope: None,
            state: Some("xyz".into()),
            code_challenge: Some(challenge.into()),
            code_challenge_method: Some("S256".into()),
        }
    }

    fn query_param(location: &str, key: &str) -> Option<String> {
        Url::parse(location)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    async fn obtain_code(server: &AuthorizationServer, challenge: &str) -> String {
        match server.authorize(&auth_request(challenge)).await {
            AuthorizeResponse::Redirect(location) => query_param(&location, "code").unwrap(),
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    fn code_exchange(code: &str, verifier: Option<&str>) -> TokenRequest {
        TokenRequest {
            grant_type: Some("authorization_code".into()),
            code: Some(code.into()),
            redirect_uri: Some(REDIRECT.into()),
            code_verifier: verifier.map(str::to_string),
            client_id: Some("app".into()),
            ..TokenRequest::default()
        }
    }

    fn refresh(refresh_token: &str) -> TokenRequest {
        TokenRequest {
            grant_type: Some("refresh_token".into()),
            refresh_token: Some(refresh_token.into()),
            client_id: Some("app".into()),
            ..TokenRequest::default()
        }
    }

    async fn full_login(server: &AuthorizationServer) -> TokenResponse {
        let pair = pkce::generate().unwrap();
        let code = obtain_code(server, &pair.challenge).await;
        server.token(&code_exchange(&code, Some(pair.verifier.as_str())), None).await.unwrap()
    }

    #[tokio::test]
    async fn test_authorize_redirects_with_code_and_state() {
        let server = public_server();
        let pair = pkce::generate().unwrap();
        let AuthorizeResponse::Redirect(location) = server.authorize(&auth_request(&pair.challenge)).await
        else {
            panic!("expected redirect");
        };
        assert!(location.starts_with(REDIRECT));
        assert!(query_param(&location, "code").is_some());
        assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));
        assert_eq!(server.code_count().await, 1);
    }

    #[tokio::test]
    async fn test_authorize_validation_order() {
        let server = public_server();

        let mut req = auth_request("challenge");
        req.response_type = Some("token".into());
        let AuthorizeResponse::Redirect(location) = server.authorize(&req).await else {
            panic!("expected redirect");
        };
        assert_eq!(query_param(&location, "error").as_deref(), Some("invalid_request"));
        assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));

        let mut req = auth_request("challenge");
        req.client_id = None;
        assert_eq!(
            server.authorize(&req).await,
            AuthorizeResponse::Direct(OAuthError::invalid_request("Missing client_id"))
        );

        let mut req = auth_request("challenge");
        req.client_id = Some("intruder".into());
        assert!(matches!(
            server.authorize(&req).await,
            AuthorizeResponse::Direct(OAuthError::InvalidClient(_))
        ));

        let mut req = auth_request("challenge");
        req.redirect_uri = Some("https://evil.example/cb".into());
        assert!(matches!(
            server.authorize(&req).await,
            AuthorizeResponse::Direct(OAuthError::InvalidRequest(_))
        ));

        let mut req = auth_request("challenge");
        req.code_challenge_method = Some("plain".into());
        let AuthorizeResponse::Redirect(location) = server.authorize(&req).await else {
            panic!("expected redirect");
        };
        assert_eq!(query_param(&location, "error").as_deref(), Some("invalid_request"));
        assert!(query_param(&location, "code").is_none());
    }

    #[tokio::test]
    async fn test_authorize_rejects_unknown_scope() {
        let server = public_server();
        let mut req = auth_request("challenge");
        req.scope = Some("read admin".into());
        let AuthorizeResponse::Redirect(location) = server.authorize(&req).await else {
            panic!("expected redirect");
        };
        assert_eq!(query_param(&location, "error").as_deref(), Some("invalid_scope"));
    }

    #[tokio::test]
    async fn test_code_exchange_issues_tokens_once() {
        let server = public_server();
        let pair = pkce::generate().unwrap();
        let code = obtain_code(&server, &pair.challenge).await;

        let tokens = server.token(&code_exchange(&code, Some(pair.verifier.as_str())), None).await.unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 3600);
        assert_eq!(tokens.scope, "mcp");
        assert!(tokens.refresh_token.is_some());
        assert_eq!(server.code_count().await, 0);

        let replay = server.token(&code_exchange(&code, Some(pair.verifier.as_str())), None).await;
        assert_eq!(replay.unwrap_err().code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_code_exchange_pkce_failures() {
        let server = public_server();
        let pair = pkce::generate().unwrap();
        let code = obtain_code(&server, &pair.challenge).await;

        let missing = server.token(&code_exchange(&code, None), None).await;
        assert_eq!(missing.unwrap_err().code(), "invalid_grant");

        let other = pkce::generate().unwrap();
        let wrong = server.token(&code_exchange(&code, Some(other.verifier.as_str())), None).await;
        assert_eq!(wrong.unwrap_err().code(), "invalid_grant");

        // Failed attempts leave the code exchangeable.
        assert!(server.token(&code_exchange(&code, Some(pair.verifier.as_str())), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_code_exchange_client_and_redirect_mismatch() {
        let server = public_server();
        let pair = pkce::generate().unwrap();
        let code = obtain_code(&server, &pair.challenge).await;

        let mut req = code_exchange(&code, Some(pair.verifier.as_str()));
        req.client_id = Some("other".into());
        assert_eq!(server.token(&req, None).await.unwrap_err().code(), "invalid_grant");

        let mut req = code_exchange(&code, Some(pair.verifier.as_str()));
        req.redirect_uri = Some("https://app.example/other".into());
        assert_eq!(server.token(&req, None).await.unwrap_err().code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let (clock, now) = manual_clock();
        let server = public_server().with_clock(clock);
        let pair = pkce::generate().unwrap();
        let code = obtain_code(&server, &pair.challenge).await;

        *now.lock().unwrap() += TimeDelta::seconds(601);
        let result = server.token(&code_exchange(&code, Some(pair.verifier.as_str())), None).await;
        assert_eq!(result.unwrap_err().code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_optional_pkce_still_checks_supplied_verifier() {
        let server = AuthorizationServer::new(
            ClientConfiguration::public("app", vec![REDIRECT.to_string()]).with_require_pkce(false),
            StoreLimits::default(),
        );
        let pair = pkce::generate().unwrap();

        let code = obtain_code(&server, &pair.challenge).await;
        let wrong = pkce::generate().unwrap();
        let result = server.token(&code_exchange(&code, Some(wrong.verifier.as_str())), None).await;
        assert_eq!(result.unwrap_err().code(), "invalid_grant");
        assert!(server.token(&code_exchange(&code, None), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let server = public_server();
        let first = full_login(&server).await;
        let rt = first.refresh_token.clone().unwrap();

        let second = server.token(&refresh(&rt), None).await.unwrap();
        assert_ne!(second.access_token, first.access_token);
        assert_ne!(second.refresh_token.as_deref(), Some(rt.as_str()));

        let old = format!("Bearer {}", first.access_token);
        let new = format!("Bearer {}", second.access_token);
        assert!(server.validate_bearer(Some(old.as_str())).await.is_none());
        assert!(server.validate_bearer(Some(new.as_str())).await.is_some());

        // The rotated-out refresh token is dead.
        assert_eq!(server.token(&refresh(&rt), None).await.unwrap_err().code(), "invalid_grant");
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_refresh_can_narrow_but_not_widen_scope() {
        let server = public_server();
        let pair = pkce::generate().unwrap();
        let mut req = auth_request(&pair.challenge);
        req.scope = Some("read write".into());
        let AuthorizeResponse::Redirect(location) = server.authorize(&req).await else {
            panic!("expected redirect");
        };
        let code = query_param(&location, "code").unwrap();
        let tokens = server.token(&code_exchange(&code, Some(pair.verifier.as_str())), None).await.unwrap();
        assert_eq!(tokens.scope, "read write");

        let mut widen = refresh(tokens.refresh_token.as_deref().unwrap());
        widen.scope = Some("read admin".into());
        assert_eq!(server.token(&widen, None).await.unwrap_err().code(), "invalid_scope");

        let mut narrow = refresh(tokens.refresh_token.as_deref().unwrap());
        narrow.scope = Some("read".into());
        assert_eq!(server.token(&narrow, None).await.unwrap().scope, "read");
    }

    #[tokio::test]
    async fn test_refresh_by_other_client_fails() {
        let server = public_server();
        let tokens = full_login(&server).await;
        let mut req = refresh(tokens.refresh_token.as_deref().unwrap());
        req.client_id = Some("other".into());
        assert_eq!(server.token(&req, None).await.unwrap_err().code(), "invalid_client");
    }

    #[tokio::test]
    async fn test_expired_refresh_token_revokes_session() {
        let (clock, now) = manual_clock();
        let server = AuthorizationServer::new(
            ClientConfiguration::public("app", vec![REDIRECT.to_string()])
                .with_refresh_token_lifetime(Some(7200)),
            StoreLimits::default(),
        )
        .with_clock(clock);
        let tokens = full_login(&server).await;

        *now.lock().unwrap() += TimeDelta::seconds(7201);
        let result = server.token(&refresh(tokens.refresh_token.as_deref().unwrap()), None).await;
        assert_eq!(result.unwrap_err().code(), "invalid_grant");
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_refresh_after_access_expiry() {
        let (clock, now) = manual_clock();
        let server = public_server().with_clock(clock);
        let tokens = full_login(&server).await;
        let bearer = format!("Bearer {}", tokens.access_token);

        *now.lock().unwrap() += TimeDelta::seconds(3601);
        assert!(server.validate_bearer(Some(bearer.as_str())).await.is_none());
        assert_eq!(server.sweep().await.expired_sessions, 0);

        let renewed = server.token(&refresh(tokens.refresh_token.as_deref().unwrap()), None).await;
        assert!(renewed.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_replaces_duplicate_sessions() {
        let server = public_server();
        let tokens = full_login(&server).await;
        let rt = tokens.refresh_token.clone().unwrap();

        // A second session sharing the refresh token, as left by an
        // interrupted rotation.
        server
            .with_state(|state| {
                let mut dup = state.sessions.get(&tokens.access_token).unwrap().clone();
                dup.access_token = "duplicate".into();
                state.sessions.insert(dup);
            })
            .await;
        assert_eq!(server.session_count().await, 2);

        let renewed = server.token(&refresh(&rt), None).await.unwrap();
        assert_eq!(server.session_count().await, 1);
        assert!(server.validate_access_token("duplicate").await.is_none());
        assert!(server.validate_access_token(&renewed.access_token).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_single_winner() {
        let server = public_server();
        let tokens = full_login(&server).await;
        let req = refresh(tokens.refresh_token.as_deref().unwrap());

        let (a, b) = tokio::join!(
            {
                let server = server.clone();
                let req = req.clone();
                tokio::spawn(async move { server.token(&req, None).await })
            },
            {
                let server = server.clone();
                let req = req.clone();
                tokio::spawn(async move { server.token(&req, None).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_client_credentials_requires_confidential_client() {
        let server = public_server();
        let req = TokenRequest {
            grant_type: Some("client_credentials".into()),
            client_id: Some("app".into()),
            ..TokenRequest::default()
        };
        assert_eq!(server.token(&req, None).await.unwrap_err().code(), "unauthorized_client");
    }

    #[tokio::test]
    async fn test_client_credentials_basic() {
        let server = confidential_server(ClientAuthMethod::ClientSecretBasic);
        let req = TokenRequest {
            grant_type: Some("client_credentials".into()),
            ..TokenRequest::default()
        };
        let good = BasicCredentials { client_id: "svc".into(), client_secret: "s3cret".into() };
        let tokens = server.token(&req, Some(good)).await.unwrap();
        assert!(tokens.refresh_token.is_none());
        assert_eq!(tokens.scope, "mcp");

        let bad = BasicCredentials { client_id: "svc".into(), client_secret: "guess".into() };
        assert_eq!(server.token(&req, Some(bad)).await.unwrap_err().code(), "invalid_client");

        // Basic method rejects body credentials.
        let body = TokenRequest {
            client_id: Some("svc".into()),
            client_secret: Some("s3cret".into()),
            ..req
        };
        assert_eq!(server.token(&body, None).await.unwrap_err().code(), "invalid_client");
    }

    #[tokio::test]
    async fn test_client_credentials_post() {
        let server = confidential_server(ClientAuthMethod::ClientSecretPost);
        let req = TokenRequest {
            grant_type: Some("client_credentials".into()),
            client_id: Some("svc".into()),
            client_secret: Some("s3cret".into()),
            scope: Some("mcp".into()),
            ..TokenRequest::default()
        };
        assert!(server.token(&req, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_basic_and_body_must_agree() {
        let server = confidential_server(ClientAuthMethod::ClientSecretBasic);
        let req = TokenRequest {
            grant_type: Some("client_credentials".into()),
            client_id: Some("someone-else".into()),
            ..TokenRequest::default()
        };
        let basic = BasicCredentials { client_id: "svc".into(), client_secret: "s3cret".into() };
        assert_eq!(server.token(&req, Some(basic)).await.unwrap_err().code(), "invalid_client");

        let req = TokenRequest {
            grant_type: Some("client_credentials".into()),
            client_id: Some("svc".into()),
            client_secret: Some("other-secret".into()),
            ..TokenRequest::default()
        };
        let basic = BasicCredentials { client_id: "svc".into(), client_secret: "s3cret".into() };
        assert_eq!(server.token(&req, Some(basic)).await.unwrap_err().code(), "invalid_client");

        let req = TokenRequest {
            grant_type: Some("client_credentials".into()),
            client_id: Some("svc".into()),
            client_secret: Some("s3cret".into()),
            ..TokenRequest::default()
        };
        let basic = BasicCredentials { client_id: "svc".into(), client_secret: "s3cret".into() };
        assert!(server.token(&req, Some(basic)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_and_missing_grant_type() {
        let server = public_server();
        let req = TokenRequest { grant_type: Some("password".into()), ..TokenRequest::default() };
        assert_eq!(server.token(&req, None).await.unwrap_err().code(), "unsupported_grant_type");

        let req = TokenRequest::default();
        assert_eq!(server.token(&req, None).await.unwrap_err().code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_validate_bearer_header_forms() {
        let server = public_server();
        let tokens = full_login(&server).await;

        let header = format!("Bearer {}", tokens.access_token);
        let ok = server.validate_bearer(Some(header.as_str())).await;
        let session = ok.unwrap();
        assert_eq!(session.client_id, "app");
        assert!(session.has_scope("mcp"));

        assert!(server.validate_bearer(None).await.is_none());
        assert!(server.validate_bearer(Some(tokens.access_token.as_str())).await.is_none());
        assert!(server.validate_bearer(Some("Basic abc")).await.is_none());
        assert!(server.validate_bearer(Some("Bearer ")).await.is_none());
        assert!(server.validate_bearer(Some("Bearer unknown")).await.is_none());
    }

    #[tokio::test]
    async fn test_validate_removes_stale_alias() {
        let server = public_server();
        let tokens = full_login(&server).await;
        server
            .with_state(|state| {
                let session = state.sessions.get(&tokens.access_token).unwrap().clone();
                state.sessions.insert_alias("stale-alias", session);
            })
            .await;

        assert!(server.validate_access_token("stale-alias").await.is_none());
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_access_expiry_without_refresh_deletes_session() {
        let (clock, now) = manual_clock();
        let server = AuthorizationServer::new(
            ClientConfiguration::public("app", vec![REDIRECT.to_string()]).without_refresh_tokens(),
            StoreLimits::default(),
        )
        .with_clock(clock);
        let tokens = full_login(&server).await;
        assert!(tokens.refresh_token.is_none());

        *now.lock().unwrap() += TimeDelta::seconds(3600);
        assert!(server.validate_access_token(&tokens.access_token).await.is_none());
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_session_bound_keeps_newest() {
        let server = AuthorizationServer::new(
            ClientConfiguration::confidential(
                "svc",
                "s3cret",
                ClientAuthMethod::ClientSecretPost,
                vec![REDIRECT.to_string()],
            ),
            StoreLimits { max_sessions: 3, ..StoreLimits::default() },
        );
        let req = TokenRequest {
            grant_type: Some("client_credentials".into()),
            client_id: Some("svc".into()),
            client_secret: Some("s3cret".into()),
            ..TokenRequest::default()
        };
        let mut issued = Vec::new();
        for _ in 0..5 {
            issued.push(server.token(&req, None).await.unwrap().access_token);
        }
        assert_eq!(server.session_count().await, 3);
        assert!(server.validate_access_token(&issued[0]).await.is_none());
        assert!(server.validate_access_token(&issued[1]).await.is_none());
        for token in &issued[2..] {
            assert!(server.validate_access_token(token).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_code_bound_keeps_newest() {
        let server = AuthorizationServer::new(
            ClientConfiguration::public("app", vec![REDIRECT.to_string()]),
            StoreLimits { max_authorization_codes: 2, ..StoreLimits::default() },
        );
        let pair = pkce::generate().unwrap();
        let first = obtain_code(&server, &pair.challenge).await;
        let _second = obtain_code(&server, &pair.challenge).await;
        let third = obtain_code(&server, &pair.challenge).await;
        assert_eq!(server.code_count().await, 2);

        let evicted = server.token(&code_exchange(&first, Some(pair.verifier.as_str())), None).await;
        assert_eq!(evicted.unwrap_err().code(), "invalid_grant");
        assert!(server.token(&code_exchange(&third, Some(pair.verifier.as_str())), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_codes() {
        let (clock, now) = manual_clock();
        let server = public_server().with_clock(clock);
        obtain_code(&server, "challenge").await;

        *now.lock().unwrap() += TimeDelta::seconds(600);
        let stats = server.sweep().await;
        assert_eq!(stats.expired_codes, 1);
        assert_eq!(server.code_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_requests_still_sweep() {
        let (clock, now) = manual_clock();
        let server = public_server().with_clock(clock);
        obtain_code(&server, "challenge").await;
        *now.lock().unwrap() += TimeDelta::seconds(700);

        let mut bad = auth_request("challenge");
        bad.response_type = Some("token".into());
        assert!(matches!(server.authorize(&bad).await, AuthorizeResponse::Redirect(_)));
        assert_eq!(server.code_count().await, 0);

        obtain_code(&server, "challenge").await;
        *now.lock().unwrap() += TimeDelta::seconds(700);

        let req = TokenRequest { grant_type: Some("password".into()), ..TokenRequest::default() };
        assert_eq!(server.token(&req, None).await.unwrap_err().code(), "unsupported_grant_type");
        assert_eq!(server.code_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_task_runs_and_stops() {
        let (clock, now) = manual_clock();
        let limits = StoreLimits {
            cleanup_interval: std::time::Duration::from_millis(20),
            ..StoreLimits::default()
        };
        let server = AuthorizationServer::new(
            ClientConfiguration::public("app", vec![REDIRECT.to_string()]),
            limits,
        )
        .with_clock(clock);
        obtain_code(&server, "challenge").await;
        let handle = server.start_cleanup_task();

        *now.lock().unwrap() += TimeDelta::seconds(601);
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(server.code_count().await, 0);

        handle.shutdown().await;
    }

    #[test]
    fn test_parse_scope_dedupes() {
        assert_eq!(parse_scope(Some("read  write read")), vec!["read", "write"]);
        assert!(parse_scope(None).is_empty());
    }
}
