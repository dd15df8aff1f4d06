//! Gateway OAuth server - Entry Point

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gateway_oauth::{
    ClientAuthMethod, ClientConfiguration, Config, GatewayServer, StoreLimits,
    config::{defaults, split_list},
};

#[derive(Parser, Debug)]
#[command(name = "gateway-oauth")]
#[command(about = "Protocol gateway with an embedded OAuth 2.1 authorization server")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value_t = defaults::PORT, env = "PORT")]
    port: u16,

    /// Public base URL advertised in OAuth metadata (e.g., https://gateway.example)
    #[arg(long, default_value = defaults::BASE_URL, env = "BASE_URL")]
    base_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Registered OAuth client id
    #[arg(long, env = "OAUTH_CLIENT_ID")]
    client_id: String,

    /// Client secret (required for client_secret_post and client_secret_basic)
    #[arg(long, env = "OAUTH_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Allowed redirect URI; repeat or separate with commas
    #[arg(long = "redirect-uri", env = "OAUTH_REDIRECT_URIS", value_delimiter = ',', required = true)]
    redirect_uris: Vec<String>,

    /// Supported scopes
    #[arg(long, env = "OAUTH_SCOPES", value_delimiter = ',', default_value = "mcp")]
    scopes: Vec<String>,

    /// Scopes granted when a request names none
    #[arg(long, env = "OAUTH_DEFAULT_SCOPES", value_delimiter = ',', default_value = "mcp")]
    default_scopes: Vec<String>,

    /// Client authentication method at the token endpoint
    #[arg(long, env = "OAUTH_CLIENT_AUTH_METHOD", default_value = "none")]
    auth_method: ClientAuthMethod,

    /// Require PKCE (S256) on the authorization code flow
    #[arg(long, env = "OAUTH_REQUIRE_PKCE", default_value_t = true, action = clap::ArgAction::Set)]
    require_pkce: bool,

    /// Access token lifetime in seconds
    #[arg(long, env = "OAUTH_ACCESS_TOKEN_TTL", default_value_t = defaults::ACCESS_TOKEN_LIFETIME_SECS)]
    access_token_ttl: u64,

    /// Refresh token lifetime in seconds; 0 means refresh tokens never expire
    #[arg(long, env = "OAUTH_REFRESH_TOKEN_TTL", default_value_t = defaults::REFRESH_TOKEN_LIFETIME_SECS)]
    refresh_token_ttl: u64,

    /// Do not issue refresh tokens
    #[arg(long, env = "OAUTH_DISABLE_REFRESH_TOKENS")]
    disable_refresh_tokens: bool,

    /// Maximum outstanding authorization codes
    #[arg(long, default_value_t = defaults::MAX_AUTHORIZATION_CODES)]
    max_authorization_codes: usize,

    /// Maximum live token sessions
    #[arg(long, default_value_t = defaults::MAX_SESSIONS)]
    max_sessions: usize,

    /// Seconds between background cleanup sweeps
    #[arg(long, default_value_t = defaults::CLEANUP_INTERVAL.as_secs())]
    cleanup_interval: u64,

    /// Pre-shared key accepted in the X-API-Key header on protected routes
    #[arg(long, env = "GATEWAY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl Cli {
    fn into_config(self) -> Config {
        let redirect_uris = self.redirect_uris.iter().flat_map(|u| split_list(u)).collect();

        let mut client = ClientConfiguration::public(self.client_id, redirect_uris);
        client.client_secret = self.client_secret;
        client.auth_method = self.auth_method;
        client.supported_scopes = self.scopes;
        client.default_scopes = self.default_scopes;
        client.require_pkce = self.require_pkce;
        client.access_token_lifetime = self.access_token_ttl;
        client.refresh_token_lifetime = (self.refresh_token_ttl > 0).then_some(self.refresh_token_ttl);
        client.issue_refresh_tokens = !self.disable_refresh_tokens;

        let mut config = Config::new(client);
        config.port = self.port;
        config.base_url = self.base_url;
        config.api_key = self.api_key;
        config.limits = StoreLimits {
            max_authorization_codes: self.max_authorization_codes,
            max_sessions: self.max_sessions,
            cleanup_interval: Duration::from_secs(self.cleanup_interval),
        };
        config
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting gateway OAuth server");

    let server = GatewayServer::new(cli.into_config())?;
    server.run_http().await
}
