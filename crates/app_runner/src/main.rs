use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use core_types::{AppViewState, BalanceSource, GateEvent, MarketDataSource, WalletSession};
use feed_balance::SolanaRpcBalance;
use feed_market::DexScreenerFeed;
use infra_bus::RingBus;
use metrics_exporter_prometheus::PrometheusHandle;
use observability::{init_metrics, init_tracing};
use parking_lot::RwLock;
use serde::Serialize;
use unlock_engine::{PuzzleStatus, UnlockEngine};

mod config_loader;
mod control_api;
mod poll_scheduler;
mod state;

use config_loader::{load_app_config, AppConfig};
use control_api::build_router;
use poll_scheduler::{
    spawn_balance_refresh_loop, spawn_market_poll_loop, BalanceFetcher, MarketPoller,
    PollOutcome, SharedEngine,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_tracing("app_runner");
    let cfg = load_app_config()?;
    let prometheus = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(?err, "metrics disabled");
            None
        }
    };

    let market_source: Arc<dyn MarketDataSource> =
        Arc::new(DexScreenerFeed::new(cfg.market.clone()));
    let balance_source: Arc<dyn BalanceSource> = Arc::new(SolanaRpcBalance::new(cfg.rpc.clone()));
    let state = AppState::build(&cfg, market_source, balance_source, prometheus)
        .context("build app state")?;

    tracing::info!(
        mint = %cfg.gate.mint,
        minimum_required_balance = cfg.gate.minimum_required_balance,
        puzzles = cfg.gate.puzzles.len(),
        market_url = %cfg.market.url(),
        rpc = %cfg.rpc.endpoint,
        "gate configured"
    );

    spawn_market_poll_loop(
        state.market.clone(),
        Duration::from_secs(cfg.poll.market_interval_secs),
    );
    if cfg.poll.balance_refresh_secs > 0 {
        spawn_balance_refresh_loop(
            state.balances.clone(),
            Duration::from_secs(cfg.poll.balance_refresh_secs),
        );
    }

    let addr = cfg.bind_addr()?;
    let app = build_router(state);
    tracing::info!(%addr, "control api started");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
