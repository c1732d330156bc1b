//! KAMOS RELAY Gateway — single-pass and autonomous analysis over HTTP.
//! POST / and /ask (JSON or SSE), GET /health.

mod relay;

use kamos_core::RelayConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[kamos-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match RelayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[kamos-gateway] {}", e);
            std::process::exit(1);
        }
    };

    let state = match relay::AppState::from_config(&config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("[kamos-gateway] {}", e);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&config.relay.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("[kamos-gateway] cannot bind {}: {}", config.relay.bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        target: "kamos::gateway",
        addr = %config.relay.bind_addr,
        phases = config.relay.phase_count,
        model = %config.gemini.model,
        kamos = %config.kamos.api_url,
        "relay listening"
    );

    if let Err(e) = axum::serve(listener, relay::build_app(state)).await {
        tracing::error!(target: "kamos::gateway", error = %e, "server stopped");
        std::process::exit(1);
    }
}
