use std::sync::OnceLock;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Hold the returned guard for the life of the process or buffered log lines
/// are lost on exit.
pub fn init_tracing(service_name: &str) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(service_name)));

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_target(true)
        .try_init();

    guard
}

pub fn default_filter(service_name: &str) -> String {
    format!("{service_name}=info,unlock_engine=info,info")
}

pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install prometheus recorder")?;
    describe_gate_metrics();

    let _ = PROM_HANDLE.set(handle.clone());
    Ok(handle)
}

fn describe_gate_metrics() {
    metrics::describe_counter!("gate.market.poll_ok", "market polls applied");
    metrics::describe_counter!("gate.market.poll_error", "market polls that failed");
    metrics::describe_counter!("gate.market.poll_stale", "market results from superseded polls");
    metrics::describe_counter!(
        "gate.market.poll_coalesced",
        "poll triggers skipped while a fetch was in flight"
    );
    metrics::describe_counter!("gate.balance.fetch_ok", "balance reads applied");
    metrics::describe_counter!("gate.balance.fetch_error", "balance reads that failed");
    metrics::describe_gauge!("gate.market_cap_usd", "last applied market cap");
    metrics::describe_gauge!("gate.unlocked_puzzles", "number of unlocked puzzles");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_names_service() {
        let f = default_filter("app_runner");
        assert!(f.starts_with("app_runner=info"));
        assert!(EnvFilter::try_new(&f).is_ok());
    }

    #[test]
    fn metrics_handle_is_shared() {
        let a = init_metrics().expect("recorder");
        let b = init_metrics().expect("recorder");
        metrics::counter!("gate.market.poll_ok").increment(1);
        assert!(b.render().contains("gate_market_poll_ok"));
        drop(a);
    }
}
