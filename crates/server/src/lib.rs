//! Prism server shell.
//!
//! Provides a reusable serve function for the binary and for tests: logger
//! init, bearer-key auth, router assembly, and graceful shutdown.

#![deny(missing_docs)]

mod auth;
mod logger;

use std::net::SocketAddr;
use std::sync::Arc;

use auth::AuthLayer;
use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Configuration for serving Prism.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The loaded environment configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "gateway=debug").
    pub log_filter: String,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the Prism server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    // The debug env toggle wins over the CLI filter.
    let log_filter = if config.debug { "debug".to_string() } else { log_filter };
    logger::init(&log_filter);

    log::info!("Prism {version}");

    config.validate()?;

    let auth = AuthLayer::new(config.auth.clone());
    let gateway = Arc::new(gateway::Gateway::new(config)?);

    let app = gateway::router(gateway).layer(auth);

    let listener = TcpListener::bind(listen_address).await?;
    let bound_addr = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender {
        let _ = sender.send(bound_addr);
    }

    log::info!("Listening on {bound_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await?;

    log::info!("Shutting down");

    Ok(())
}
