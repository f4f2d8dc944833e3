mod auth;
mod config;
mod connection;
mod proxy;
mod relay;
mod socks;
mod tunnel;

#[cfg(test)]
mod test_support;

use crate::auth::Authenticator;
use crate::config::{Cli, ProxyConfig};
use crate::connection::ConnectionTracker;
use crate::proxy::{serve_client, ProxyContext};
use crate::socks::SocksConnector;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("http_socks_relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    color_eyre::install()?;

    let args = Cli::parse();
    let config = Arc::new(ProxyConfig::from_cli(args).await?);

    let ctx = ProxyContext {
        connector: Arc::new(SocksConnector::new(config.socks_addr)),
        authenticator: Arc::new(Authenticator::new(config.credentials.clone())),
        tracker: ConnectionTracker::new(),
    };

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .wrap_err_with(|| format!("failed to bind {}", config.listen_addr))?;

    info!("HTTP proxy listening on http://{}", config.listen_addr);
    info!("SOCKS5 backend: {}", ctx.connector.socks_addr());
    if ctx.authenticator.is_enabled() {
        info!("Proxy authentication enabled");
    }

    let tracker = ctx.tracker.clone();

    // Main server loop
    let server = async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let guard = ctx.tracker.track();
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        serve_client(stream, peer, ctx).await;
                        drop(guard);
                    });
                }
                Err(e) => {
                    warn!("Accept error: {} (continuing)", e);
                    continue;
                }
            }
        }
    };

    // Graceful shutdown signal handling
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }

        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = server => {
            warn!("Server loop terminated");
        }
        _ = shutdown => {
            drain_connections(&tracker).await;
            info!("Server shutdown complete");
        }
    }

    Ok(())
}

/// Give in-flight connections up to 30 seconds to finish
async fn drain_connections(tracker: &ConnectionTracker) {
    let active = tracker.active_count();
    if active == 0 {
        return;
    }
    info!("Waiting for {} connections to close...", active);

    for i in 1..=30 {
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        let remaining = tracker.active_count();

        if remaining == 0 {
            info!("All connections closed gracefully");
            return;
        }

        if i % 5 == 0 {
            info!("Still waiting for {} connections... ({}/30s)", remaining, i);
        }
    }

    warn!(
        "Forced shutdown with {} connections still active",
        tracker.active_count()
    );
}
