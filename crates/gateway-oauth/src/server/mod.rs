//! Gateway HTTP server.
//!
//! Hosts the embedded OAuth authorization server next to the routes it
//! protects, and runs the periodic store cleanup for as long as the
//! listener is up.

pub mod auth;
pub mod oauth;
pub mod transport;

use std::net::SocketAddr;

use axum::Router;

use crate::config::Config;
use crate::error::ConfigError;
use oauth::AuthorizationServer;

/// The gateway server.
#[derive(Debug, Clone)]
pub struct GatewayServer {
    config: Config,
    oauth: AuthorizationServer,
}

impl GatewayServer {
    /// Create a new server from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let oauth = AuthorizationServer::from_config(&config)?;
        Ok(Self { config, oauth })
    }

    #[must_use]
    pub const fn oauth(&self) -> &AuthorizationServer {
        &self.oauth
    }

    /// Build the router without starting the cleanup task.
    #[must_use]
    pub fn router(&self) -> Router {
        transport::create_router(self.oauth.clone(), &self.config.base_url, self.config.api_key.clone())
    }

    /// Run the server in HTTP mode until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error on bind or server failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        tracing::info!(
            client_id = %self.config.client.client_id,
            auth_method = %self.config.client.auth_method,
            "Starting gateway on port {}",
            self.config.port
        );

        let cleanup = self.oauth.start_cleanup_task();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server listening on http://{}", addr);
        let served = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await;

        cleanup.shutdown().await;
        tracing::info!("HTTP server shut down");
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
