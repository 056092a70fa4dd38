//! Webhook HTTP(S) server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::{info, warn};

use crate::webhook::{webhook_router, WebhookState};
use crate::{Error, Result};

/// Default listen port; the API server calls webhooks on 443 unless told otherwise
pub const DEFAULT_PORT: u16 = 443;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM file
    pub cert_path: Option<PathBuf>,
    /// TLS private key PEM file
    pub key_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Listen on all interfaces at `port`
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            cert_path: None,
            key_path: None,
        }
    }

    /// Use the given certificate and key files
    pub fn with_tls(mut self, cert_path: Option<PathBuf>, key_path: Option<PathBuf>) -> Self {
        self.cert_path = cert_path;
        self.key_path = key_path;
        self
    }

    /// Certificate and key paths when both are configured
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.cert_path.as_ref().zip(self.key_path.as_ref())
    }
}

/// Serve the webhook until the listener fails
pub async fn serve(config: ServerConfig, state: Arc<WebhookState>) -> Result<()> {
    let app = webhook_router(state);

    match config.tls_paths() {
        Some((cert, key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| Error::config(format!("TLS config error: {e}")))?;

            info!(addr = %config.addr, "Starting webhook server (TLS)");
            axum_server::bind_rustls(config.addr, tls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| Error::config(format!("server error: {e}")))
        }
        None => {
            warn!(
                addr = %config.addr,
                "No TLS certificate configured, serving plain HTTP"
            );
            let listener = tokio::net::TcpListener::bind(config.addr)
                .await
                .map_err(|e| Error::config(format!("failed to bind {}: {e}", config.addr)))?;
            axum::serve(listener, app)
                .await
                .map_err(|e| Error::config(format!("server error: {e}")))
        }
    }
}
