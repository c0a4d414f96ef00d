use super::*;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) engine: SharedEngine,
    pub(super) bus: RingBus<GateEvent>,
    pub(super) market: Arc<MarketPoller>,
    pub(super) balances: Arc<BalanceFetcher>,
    pub(super) prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub(super) fn build(
        cfg: &AppConfig,
        market_source: Arc<dyn MarketDataSource>,
        balance_source: Arc<dyn BalanceSource>,
        prometheus: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let bus = RingBus::new(cfg.poll.bus_capacity);
        let engine = UnlockEngine::new(cfg.gate.clone(), bus.clone())?;
        let engine: SharedEngine = Arc::new(RwLock::new(engine));
        let fetch_timeout = Duration::from_millis(cfg.poll.fetch_timeout_ms);
        Ok(Self {
            market: Arc::new(MarketPoller::new(
                market_source,
                engine.clone(),
                fetch_timeout,
            )),
            balances: Arc::new(BalanceFetcher::new(
                balance_source,
                engine.clone(),
                fetch_timeout,
            )),
            engine,
            bus,
            prometheus,
        })
    }

    pub(super) fn view(&self) -> AppViewState {
        self.engine.read().view()
    }
}
