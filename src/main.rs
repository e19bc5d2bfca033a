// =============================================================================
// Strata Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. An operator must
// explicitly resume trading and switch to Live account mode via the control
// API (§10.5). Startup sequence: load config, restore persisted SystemState
// (or start fresh), reconcile against the venue, subscribe to market data,
// mount the ambient HTTP/WebSocket surface, then run until Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod indicators;
mod market_data;
mod notify;
mod order_manager;
mod orchestrator;
mod position;
mod regime;
mod risk;
mod rules;
#[cfg(test)]
mod scenario_tests;
mod state;
mod types;
mod venue;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::{Config, Environment};
use crate::market_data::buffer::BarBuffer;
use crate::market_data::ingest::IngestHandle;
use crate::notify::{Notifier, TracingSink};
use crate::order_manager::OrderManager;
use crate::orchestrator::Orchestrator;
use crate::position::PositionManager;
use crate::regime::RegimeClassifier;
use crate::state::{FileKvStore, StateStore};
use crate::venue::binance_futures::BinanceFuturesClient;

const KLINE_INTERVAL: &str = "1m";
const HEALTH_TICK_SECS: u64 = 5;
const WS_BASE_URL: &str = "wss://fstream.binance.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("strata-engine starting up");

    // ── 1. Configuration ──────────────────────────────────────────────────
    let config = Config::load();
    info!(?config, "configuration loaded");
    let config = Arc::new(config);

    let dry_run = matches!(config.environment, Environment::DryRun);
    if dry_run {
        info!("DRY_RUN environment: no orders will reach the venue");
    }

    // ── 2. Persisted state ────────────────────────────────────────────────
    let kv = Arc::new(FileKvStore::new(crate::state::kv::default_state_dir()));
    let risk_limits = Orchestrator::risk_limits_from_config(&config);
    let state_store = Arc::new(
        StateStore::load_or_fresh(
            kv,
            config.state_key.clone(),
            config.starting_equity,
            config.activation_threshold,
            config.stop_atr_multiplier,
            risk_limits,
        )
        .await,
    );

    // ── 3. Core components ────────────────────────────────────────────────
    let buffer = Arc::new(BarBuffer::new());
    let regime = Arc::new(RegimeClassifier::new());
    let positions = Arc::new(PositionManager::new());

    let venue = Arc::new(BinanceFuturesClient::new(config.api_key.clone(), config.api_secret.clone()));
    let order_manager = Arc::new(OrderManager::new(Arc::clone(&venue), Arc::clone(&positions), dry_run, config.max_slippage_pct));

    for instrument in &config.instruments {
        if let Err(e) = order_manager.cache_filters(instrument).await {
            warn!(instrument, error = %e, "failed to fetch exchange filters at startup, falling back to default filters");
        }
        if !dry_run {
            if let Err(e) = venue.set_leverage(instrument, config.leverage).await {
                warn!(instrument, error = %e, "failed to set leverage at startup");
            }
        }
    }

    let ingest = IngestHandle::new(WS_BASE_URL);
    let notifier = Arc::new(Notifier::new(Box::new(TracingSink)));

    let orchestrator = Orchestrator::new(
        Arc::clone(&config),
        Arc::clone(&buffer),
        Arc::clone(&regime),
        Arc::clone(&state_store),
        Arc::clone(&positions),
        Arc::clone(&order_manager),
        ingest.clone(),
        Arc::clone(&notifier),
    );

    // ── 4. Reconcile against the venue before trading resumes ────────────
    orchestrator.reconcile_with_venue().await;

    // ── 5. Wire market data ───────────────────────────────────────────────
    orchestrator.spawn_ingest_consumer();
    ingest.subscribe_klines(&config.instruments, KLINE_INTERVAL);
    info!(instruments = ?config.instruments, interval = KLINE_INTERVAL, "subscribed to kline stream");

    // ── 6. Periodic health tick ───────────────────────────────────────────
    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(HEALTH_TICK_SECS));
            loop {
                interval.tick().await;
                orchestrator.run_health_tick().await;
            }
        });
    }

    // ── 7. Ambient control surface ────────────────────────────────────────
    let app_state = AppState::new((*config).clone(), Arc::clone(&orchestrator));
    let app = api::rest::router(Arc::clone(&app_state));

    let bind_addr = config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind_addr, "ambient control surface listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server terminated unexpectedly");
        }
    });

    // ── 8. Run until interrupted ──────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    server.abort();
    orchestrator.shutdown().await;
    info!("strata-engine shut down cleanly");

    Ok(())
}
