//! Gateway OAuth
//!
//! An OAuth 2.1 authorization server embedded in a protocol gateway. It
//! issues, rotates and validates the tokens that guard the gateway's
//! routes.
//!
//! # Features
//!
//! - **Grants**: Authorization Code with PKCE (S256), Refresh Token with
//!   rotation, Client Credentials
//! - **Bounded state**: in-memory code and session stores with oldest-first
//!   eviction and a periodic expiry sweep
//! - **Constant-time** comparison of secrets, keys and PKCE challenges
//!
//! # Example
//!
//! ```no_run
//! use gateway_oauth::{config::Config, server::GatewayServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     GatewayServer::new(config)?.run_http().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;

pub use config::{ClientAuthMethod, ClientConfiguration, Config, StoreLimits};
pub use error::{ConfigError, OAuthError, OAuthResult};
pub use server::GatewayServer;
pub use server::oauth::AuthorizationServer;
