mod config;
mod error;
mod handlers;
mod models;
mod peer;
mod rate_limit;
mod router;
mod state;
mod upstream;

use config::GatewayConfig;
use rate_limit::RateLimiter;
use router::create_router;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // RUST_LOG wins; info otherwise
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting auction gateway");

    let config = GatewayConfig::from_env()?;
    let addr = config.bind_addr;
    let lifecycle_interval = config.lifecycle_interval;
    let state = AppState::from_config(config)?;

    let heartbeat = state.broker.spawn_heartbeat();
    let lifecycle = state.lifecycle.clone().spawn(lifecycle_interval);
    let pruning = spawn_rate_limit_pruning(state.rate_limiter.clone());

    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    heartbeat.abort();
    lifecycle.abort();
    pruning.abort();
    tracing::info!("Gateway stopped");
    Ok(())
}

fn spawn_rate_limit_pruning(limiter: Arc<RateLimiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let dropped = limiter.prune_idle();
            if dropped > 0 {
                tracing::debug!(dropped, remaining = limiter.tracked_keys(), "Pruned idle rate-limit buckets");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
