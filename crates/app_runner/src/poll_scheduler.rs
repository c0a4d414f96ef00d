use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_types::{BalanceSource, FetchError, MarketDataSource, WalletSession};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use unlock_engine::{BalanceRequest, MarketApply, UnlockEngine};

pub(super) type SharedEngine = Arc<RwLock<UnlockEngine>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum PollOutcome {
    Applied,
    Retained,
    Stale,
    /// Another fetch was already in flight; nothing was fetched.
    Coalesced,
}

impl From<MarketApply> for PollOutcome {
    fn from(value: MarketApply) -> Self {
        match value {
            MarketApply::Applied => Self::Applied,
            MarketApply::Retained => Self::Retained,
            MarketApply::Stale => Self::Stale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(super) enum BalanceOutcome {
    Applied,
    /// Session moved on, or a newer read already landed.
    Dropped,
    Coalesced,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(super) struct MarketPoller {
    source: Arc<dyn MarketDataSource>,
    engine: SharedEngine,
    in_flight: AtomicBool,
    fetch_timeout: Duration,
}

impl MarketPoller {
    pub(super) fn new(
        source: Arc<dyn MarketDataSource>,
        engine: SharedEngine,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            engine,
            in_flight: AtomicBool::new(false),
            fetch_timeout,
        }
    }

    pub(super) async fn poll_once(&self) -> PollOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            metrics::counter!("gate.market.poll_coalesced").increment(1);
            tracing::debug!("market poll already in flight; coalescing");
            return PollOutcome::Coalesced;
        }
        let _guard = InFlight(&self.in_flight);

        let seq = self.engine.write().begin_market_poll();
        let result = match timeout(self.fetch_timeout, self.source.fetch_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::NetworkFailure(format!(
                "market fetch timed out after {}ms",
                self.fetch_timeout.as_millis()
            ))),
        };

        let (applied, cap, unlocked) = {
            let mut engine = self.engine.write();
            let applied = engine.refresh_market_snapshot(seq, result);
            let cap = engine.snapshot().and_then(|s| s.market_cap_usd);
            (applied, cap, engine.unlocked_puzzle_ids().len())
        };

        match applied {
            MarketApply::Applied => {
                metrics::counter!("gate.market.poll_ok").increment(1);
                if let Some(cap) = cap {
                    metrics::gauge!("gate.market_cap_usd").set(cap);
                }
                metrics::gauge!("gate.unlocked_puzzles").set(unlocked as f64);
            }
            MarketApply::Retained => metrics::counter!("gate.market.poll_error").increment(1),
            MarketApply::Stale => metrics::counter!("gate.market.poll_stale").increment(1),
        }
        applied.into()
    }
}

pub(super) fn spawn_market_poll_loop(poller: Arc<MarketPoller>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let outcome = poller.poll_once().await;
            tracing::debug!(?outcome, "market poll tick");
        }
    })
}

pub(super) struct BalanceFetcher {
    source: Arc<dyn BalanceSource>,
    engine: SharedEngine,
    in_flight: Mutex<HashSet<u64>>,
    fetch_timeout: Duration,
}

impl BalanceFetcher {
    pub(super) fn new(
        source: Arc<dyn BalanceSource>,
        engine: SharedEngine,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            engine,
            in_flight: Mutex::new(HashSet::new()),
            fetch_timeout,
        }
    }

    /// One read per session epoch at a time.
    pub(super) async fn fulfil(&self, request: BalanceRequest) -> BalanceOutcome {
        if !self.in_flight.lock().insert(request.epoch) {
            tracing::debug!(epoch = request.epoch, "balance read already in flight");
            return BalanceOutcome::Coalesced;
        }

        let fetched = timeout(
            self.fetch_timeout,
            self.source.fetch_holding(&request.owner, &request.mint),
        )
        .await;
        self.in_flight.lock().remove(&request.epoch);

        let result = match fetched {
            Ok(result) => result,
            Err(_) => Err(FetchError::NetworkFailure(format!(
                "balance fetch timed out after {}ms",
                self.fetch_timeout.as_millis()
            ))),
        };
        if result.is_ok() {
            metrics::counter!("gate.balance.fetch_ok").increment(1);
        } else {
            metrics::counter!("gate.balance.fetch_error").increment(1);
        }

        if self.engine.write().refresh_token_holding(&request, result) {
            BalanceOutcome::Applied
        } else {
            BalanceOutcome::Dropped
        }
    }

    /// Applies the session and, when it has an owner, starts its balance read.
    pub(super) fn set_session(
        self: &Arc<Self>,
        session: WalletSession,
    ) -> Option<JoinHandle<BalanceOutcome>> {
        let request = self.engine.write().set_wallet_session(session)?;
        Some(self.spawn(request))
    }

    pub(super) fn refresh_current(self: &Arc<Self>) -> Option<JoinHandle<BalanceOutcome>> {
        let request = self.engine.write().begin_balance_refresh()?;
        Some(self.spawn(request))
    }

    fn spawn(self: &Arc<Self>, request: BalanceRequest) -> JoinHandle<BalanceOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.fulfil(request).await })
    }
}

pub(super) fn spawn_balance_refresh_loop(
    fetcher: Arc<BalanceFetcher>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately; session changes already trigger a read
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Some(handle) = fetcher.refresh_current() {
                if let Ok(outcome) = handle.await {
                    tracing::debug!(?outcome, "balance refresh tick");
                }
            }
        }
    })
}
