//! Configuration for the gateway OAuth server.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default values and fixed protocol constants.
pub mod defaults {
    use std::time::Duration;

    /// Authorization code lifetime (fixed, 10 minutes).
    pub const AUTH_CODE_LIFETIME_SECS: u64 = 600;

    /// Access token lifetime: 1 hour.
    pub const ACCESS_TOKEN_LIFETIME_SECS: u64 = 3600;

    /// Refresh token lifetime: 30 days.
    pub const REFRESH_TOKEN_LIFETIME_SECS: u64 = 30 * 24 * 3600;

    /// Maximum number of outstanding authorization codes.
    pub const MAX_AUTHORIZATION_CODES: usize = 1000;

    /// Maximum number of live sessions.
    pub const MAX_SESSIONS: usize = 10_000;

    /// Interval of the background cleanup sweep.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

    /// HTTP port.
    pub const PORT: u16 = 8000;

    /// Base URL advertised in metadata documents.
    pub const BASE_URL: &str = "http://localhost:8000";
}

/// How the registered client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuthMethod {
    /// Public client, no secret. PKCE carries the proof of possession.
    #[default]
    None,
    /// `client_secret` sent in the request body.
    ClientSecretPost,
    /// Credentials sent in an HTTP Basic `Authorization` header.
    ClientSecretBasic,
}

impl ClientAuthMethod {
    /// Name as used in OAuth metadata (`token_endpoint_auth_method`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretPost => "client_secret_post",
            Self::ClientSecretBasic => "client_secret_basic",
        }
    }

    /// Returns true if the method requires a shared secret.
    #[must_use]
    pub const fn requires_secret(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for ClientAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuthMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Self::None),
            "client_secret_post" => Ok(Self::ClientSecretPost),
            "client_secret_basic" => Ok(Self::ClientSecretBasic),
            other => Err(ConfigError::invalid(
                "client_auth_method",
                format!("unsupported method '{other}'"),
            )),
        }
    }
}

/// The single registered client. Immutable once loaded.
#[derive(Clone)]
pub struct ClientConfiguration {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    /// Scopes granted when a request names none.
    pub default_scopes: Vec<String>,
    pub supported_scopes: Vec<String>,
    pub require_pkce: bool,
    pub auth_method: ClientAuthMethod,
    /// Access token lifetime in seconds.
    pub access_token_lifetime: u64,
    /// Whether a refresh token is minted alongside the access token.
    pub issue_refresh_tokens: bool,
    /// Refresh token lifetime in seconds. `None` means non-expiring.
    pub refresh_token_lifetime: Option<u64>,
}

impl ClientConfiguration {
    /// A public client: no secret, PKCE required.
    #[must_use]
    pub fn public(client_id: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uris,
            default_scopes: vec!["mcp".to_string()],
            supported_scopes: vec!["mcp".to_string()],
            require_pkce: true,
            auth_method: ClientAuthMethod::None,
            access_token_lifetime: defaults::ACCESS_TOKEN_LIFETIME_SECS,
            issue_refresh_tokens: true,
            refresh_token_lifetime: Some(defaults::REFRESH_TOKEN_LIFETIME_SECS),
        }
    }

    /// A confidential client authenticating with a shared secret.
    #[must_use]
    pub fn confidential(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_method: ClientAuthMethod,
        redirect_uris: Vec<String>,
    ) -> Self {
        Self {
            client_secret: Some(client_secret.into()),
            auth_method,
            require_pkce: false,
            ..Self::public(client_id, redirect_uris)
        }
    }

    #[must_use]
    pub fn with_scopes(mut self, supported: &[&str], default: &[&str]) -> Self {
        self.supported_scopes = supported.iter().map(|s| (*s).to_string()).collect();
        self.default_scopes = default.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub const fn with_require_pkce(mut self, require: bool) -> Self {
        self.require_pkce = require;
        self
    }

    #[must_use]
    pub const fn with_access_token_lifetime(mut self, seconds: u64) -> Self {
        self.access_token_lifetime = seconds;
        self
    }

    #[must_use]
    pub const fn with_refresh_token_lifetime(mut self, seconds: Option<u64>) -> Self {
        self.issue_refresh_tokens = true;
        self.refresh_token_lifetime = seconds;
        self
    }

    #[must_use]
    pub const fn without_refresh_tokens(mut self) -> Self {
        self.issue_refresh_tokens = false;
        self
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        if self.redirect_uris.is_empty() {
            return Err(ConfigError::invalid("redirect_uris", "at least one URI is required"));
        }
        for uri in &self.redirect_uris {
            url::Url::parse(uri)
                .map_err(|e| ConfigError::invalid("redirect_uris", format!("'{uri}': {e}")))?;
        }
        if self.auth_method.requires_secret()
            && self.client_secret.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::invalid(
                "client_secret",
                format!("required for auth method {}", self.auth_method),
            ));
        }
        if let Some(scope) =
            self.default_scopes.iter().find(|s| !self.supported_scopes.contains(s))
        {
            return Err(ConfigError::invalid(
                "default_scopes",
                format!("'{scope}' is not a supported scope"),
            ));
        }
        if self.access_token_lifetime == 0 {
            return Err(ConfigError::invalid("access_token_lifetime", "must be positive"));
        }
        Ok(())
    }
}

// Secret stays out of logs.
impl fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("client_id", &self.client_id)
            .field("has_secret", &self.client_secret.is_some())
            .field("redirect_uris", &self.redirect_uris)
            .field("supported_scopes", &self.supported_scopes)
            .field("require_pkce", &self.require_pkce)
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

/// Bounds and timers for the in-memory stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_authorization_codes: usize,
    pub max_sessions: usize,
    pub cleanup_interval: Duration,
}

impl StoreLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_authorization_codes == 0 {
            return Err(ConfigError::invalid("max_authorization_codes", "must be positive"));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::invalid("max_sessions", "must be positive"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid("cleanup_interval", "must be positive"));
        }
        Ok(())
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_authorization_codes: defaults::MAX_AUTHORIZATION_CODES,
            max_sessions: defaults::MAX_SESSIONS,
            cleanup_interval: defaults::CLEANUP_INTERVAL,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// Public base URL used in metadata documents.
    pub base_url: String,

    /// Pre-shared key accepted by the API-key authenticator (optional).
    pub api_key: Option<String>,

    /// The registered OAuth client.
    pub client: ClientConfiguration,

    /// Store bounds and sweep interval.
    pub limits: StoreLimits,
}

impl Config {
    #[must_use]
    pub fn new(client: ClientConfiguration) -> Self {
        Self {
            port: defaults::PORT,
            base_url: defaults::BASE_URL.to_string(),
            api_key: None,
            client,
            limits: StoreLimits::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// `OAUTH_CLIENT_ID` and `OAUTH_REDIRECT_URIS` are required; everything
    /// else falls back to [`defaults`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = env_var("OAUTH_CLIENT_ID").ok_or(ConfigError::Missing("OAUTH_CLIENT_ID"))?;
        let redirect_uris = env_var("OAUTH_REDIRECT_URIS")
            .map(|v| split_list(&v))
            .ok_or(ConfigError::Missing("OAUTH_REDIRECT_URIS"))?;

        let mut client = ClientConfiguration::public(client_id, redirect_uris);
        client.client_secret = env_var("OAUTH_CLIENT_SECRET");
        if let Some(method) = env_var("OAUTH_CLIENT_AUTH_METHOD") {
            client.auth_method = method.parse()?;
        }
        if let Some(scopes) = env_var("OAUTH_SCOPES") {
            client.supported_scopes = split_list(&scopes);
        }
        if let Some(scopes) = env_var("OAUTH_DEFAULT_SCOPES") {
            client.default_scopes = split_list(&scopes);
        }
        if let Some(flag) = env_var("OAUTH_REQUIRE_PKCE") {
            client.require_pkce = parse_bool("OAUTH_REQUIRE_PKCE", &flag)?;
        }
        if let Some(ttl) = env_var("OAUTH_ACCESS_TOKEN_TTL") {
            client.access_token_lifetime = parse_num("OAUTH_ACCESS_TOKEN_TTL", &ttl)?;
        }
        if let Some(ttl) = env_var("OAUTH_REFRESH_TOKEN_TTL") {
            let secs: u64 = parse_num("OAUTH_REFRESH_TOKEN_TTL", &ttl)?;
            client.refresh_token_lifetime = (secs > 0).then_some(secs);
        }
        if let Some(flag) = env_var("OAUTH_DISABLE_REFRESH_TOKENS") {
            client.issue_refresh_tokens = !parse_bool("OAUTH_DISABLE_REFRESH_TOKENS", &flag)?;
        }

        let mut config = Self::new(client);
        if let Some(port) = env_var("PORT") {
            config.port = parse_num("PORT", &port)?;
        }
        if let Some(base_url) = env_var("BASE_URL") {
            config.base_url = base_url;
        }
        config.api_key = env_var("GATEWAY_API_KEY");

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        self.limits.validate()
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Split a comma- or whitespace-separated list.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("expected a boolean, got '{other}'"))),
    }
}

fn parse_num<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))
}
