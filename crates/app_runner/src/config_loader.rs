use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use feed_balance::RpcConfig;
use feed_market::MarketFeedConfig;
use serde::{Deserialize, Serialize};
use unlock_engine::GateConfig;

const CONFIG_PATH_ENV: &str = "SOLV3_GATE_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub(super) struct PollConfig {
    pub(super) market_interval_secs: u64,
    /// 0 disables periodic balance re-checks; reads then only follow session changes.
    pub(super) balance_refresh_secs: u64,
    pub(super) fetch_timeout_ms: u64,
    pub(super) bus_capacity: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            market_interval_secs: 30,
            balance_refresh_secs: 0,
            fetch_timeout_ms: 15_000,
            bus_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub(super) struct ApiConfig {
    pub(super) bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) gate: GateConfig,
    pub(super) market: MarketFeedConfig,
    pub(super) rpc: RpcConfig,
    pub(super) poll: PollConfig,
    pub(super) api: ApiConfig,
}

impl AppConfig {
    pub(super) fn bind_addr(&self) -> Result<SocketAddr> {
        self.api
            .bind
            .parse()
            .with_context(|| format!("invalid api.bind {:?}", self.api.bind))
    }

    pub(super) fn validate(&self) -> Result<()> {
        self.gate.validate().context("invalid [gate] section")?;
        if self.poll.market_interval_secs == 0 {
            bail!("poll.market_interval_secs must be >= 1");
        }
        if self.poll.fetch_timeout_ms == 0 {
            bail!("poll.fetch_timeout_ms must be >= 1");
        }
        if self.rpc.endpoint.trim().is_empty() {
            bail!("rpc.endpoint is empty");
        }
        self.bind_addr()?;
        Ok(())
    }
}

fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("configs/gate.toml"))
}

pub(super) fn load_app_config() -> Result<AppConfig> {
    let path = config_path();
    let cfg = load_app_config_from(&path)?;
    let cfg = apply_env_overrides(cfg, |key| std::env::var(key).ok());
    cfg.validate()?;
    Ok(cfg)
}

pub(super) fn load_app_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(finalize(AppConfig::default()));
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    parse_app_config(&raw).with_context(|| format!("parse config {}", path.display()))
}

pub(super) fn parse_app_config(raw: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(raw)?;
    Ok(finalize(cfg))
}

fn finalize(mut cfg: AppConfig) -> AppConfig {
    cfg.market = cfg.market.with_token_if_unset(cfg.gate.mint.as_str());
    cfg
}

pub(super) fn apply_env_overrides<F>(mut cfg: AppConfig, lookup: F) -> AppConfig
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(v) = get("SOLV3_API_BIND") {
        cfg.api.bind = v;
    }
    if let Some(v) = get("SOLV3_RPC_ENDPOINT") {
        cfg.rpc.endpoint = v;
    }
    if let Some(v) = get("SOLV3_MARKET_ENDPOINT") {
        cfg.market.endpoint = v;
    }
    if let Some(v) = get("SOLV3_MARKET_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        cfg.poll.market_interval_secs = v;
    }
    cfg
}
