//! atp server binary
//!
//! Standalone server exposing the resumable execution engine over HTTP.

use std::sync::Arc;

use clap::Parser;

use atp_checkpoint::InMemoryCacheProvider;
use atp_core::SandboxExecutor;
use atp_server::{create_router, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(rust_log)
        .init();

    let config = ServerConfig::parse();
    tracing::info!(addr = %config.bind_addr(), "starting atp server");
    tracing::info!(prefix = %config.key_prefix, ttl = config.paused_ttl_seconds, "execution state settings");

    // the in-memory provider is the bundled backend; a distributed
    // store plugs in through the CacheProvider trait
    let provider = Arc::new(InMemoryCacheProvider::new());
    let engine = Arc::new(SandboxExecutor::new(provider, config.executor_config()));

    // background sweep of expired paused executions
    let sweeper = engine.clone();
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let expired = sweeper.sweep_expired();
            if !expired.is_empty() {
                tracing::info!(count = expired.len(), "swept expired executions");
            }
        }
    });

    let app = create_router(engine);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("atp server shut down gracefully");
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received CTRL-C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
