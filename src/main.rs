//! `llm-gateway` daemon entrypoint. Generalizes the teacher's
//! `#[tokio::main]` bootstrap (`keyvault/src/main.rs`) — load config,
//! wire up the composition root, start a background health pulse, serve
//! — onto a networked axum listener instead of a Unix socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use gateway::config::Config;
use gateway::http;
use gateway::logging;
use gateway::state::GatewayState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let log_controller = logging::init(&config.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "llm-gateway starting");

    let (state, mut price_ready_rx) = GatewayState::build(config.clone(), log_controller).await?;
    let state = Arc::new(state);

    tokio::spawn(async move {
        if price_ready_rx.changed().await.is_ok() {
            info!("price registry populated — cost accounting is now live");
        }
    });

    spawn_health_pulse(Arc::clone(&state));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "llm-gateway listening");

    let app = http::router(Arc::clone(&state));
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodic circuit/session/cost-window summary logging — the same
/// `tokio::spawn` + `interval` shape as the teacher's 15-minute health
/// pulse (`server/mod.rs`), now covering this gateway's own operational
/// state rather than per-key usage totals.
fn spawn_health_pulse(state: Arc<GatewayState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15 * 60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let circuits = state.circuits.snapshot();
            let open_count = circuits
                .values()
                .filter(|s| **s == gateway::models::CircuitState::Open)
                .count();
            info!(
                providers_tracked = circuits.len(),
                providers_open = open_count,
                "health pulse"
            );
        }
    });
}
