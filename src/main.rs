//! huddle-gateway server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use huddle_gateway::app_state::AppState;
use huddle_gateway::auth::{JwtVerifier, TokenVerifier};
use huddle_gateway::build_app;
use huddle_gateway::config::GatewayConfig;
use huddle_gateway::persistence::{ChatStore, InMemoryStore, PostgresStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, ?config, "starting huddle-gateway");
    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set, using the development secret");
    }

    let store: Arc<dyn ChatStore> = if config.persistence_enabled {
        Arc::new(PostgresStore::connect(&config).await?)
    } else {
        tracing::info!("persistence disabled, using the in-memory store");
        Arc::new(InMemoryStore::new())
    };
    let verifier: Arc<dyn TokenVerifier> =
        Arc::new(JwtVerifier::new(&config.jwt_secret, config.jwt_leeway_secs));

    let app_state = AppState::new(&config, store, verifier);

    // Forget rate-limit keys whose window has fully elapsed and session
    // state nobody is using.
    let gateway = Arc::clone(&app_state.gateway);
    let messages = Arc::clone(&app_state.messages);
    let sweep_every = config.connect_rate_limit_window();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let removed = gateway.sweep_rate_limits();
            if removed > 0 {
                tracing::debug!(removed, "swept idle rate-limit keys");
            }
            let evicted = messages.sweep_idle_sessions().await;
            if evicted > 0 {
                tracing::debug!(evicted, "swept idle session state");
            }
        }
    });

    let app = build_app(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
