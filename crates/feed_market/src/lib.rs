use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{FetchError, MarketDataSource, MarketSnapshot};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketFeedConfig {
    pub endpoint: String,
    pub chain: String,
    /// Token whose pairs are queried. Left empty, callers fill in the gate mint.
    pub token_address: String,
    pub request_timeout_ms: u64,
}

impl Default for MarketFeedConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.dexscreener.com".to_string(),
            chain: "solana".to_string(),
            token_address: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl MarketFeedConfig {
    pub fn with_token_if_unset(mut self, token_address: &str) -> Self {
        if self.token_address.trim().is_empty() {
            self.token_address = token_address.to_string();
        }
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}/tokens/v1/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.chain,
            self.token_address
        )
    }
}

pub struct DexScreenerFeed {
    http: Client,
    cfg: MarketFeedConfig,
}

impl DexScreenerFeed {
    pub fn new(cfg: MarketFeedConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_millis(cfg.request_timeout_ms.max(500)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            cfg,
        }
    }

    pub fn cfg(&self) -> &MarketFeedConfig {
        &self.cfg
    }
}

#[async_trait]
impl MarketDataSource for DexScreenerFeed {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, FetchError> {
        let url = self.cfg.url();
        let res = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::NetworkFailure(format!("market request: {e}")))?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::NetworkFailure(format!("market status {status}")));
        }
        let payload: Value = res
            .json()
            .await
            .map_err(|e| FetchError::MalformedResponse(format!("market json: {e}")))?;
        let snapshot = parse_pairs_payload(&payload, Utc::now())?;
        tracing::debug!(
            market_cap_usd = ?snapshot.market_cap_usd,
            price_usd = ?snapshot.price_usd,
            "market snapshot fetched"
        );
        Ok(snapshot)
    }
}

/// The endpoint answers with an array of pairs; the first pair is the
/// reference. Missing fields become unknown rather than failing the poll.
pub fn parse_pairs_payload(
    payload: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<MarketSnapshot, FetchError> {
    let pairs = match payload {
        Value::Array(pairs) => pairs,
        // older API versions wrapped the list
        Value::Object(obj) => match obj.get("pairs") {
            Some(Value::Array(pairs)) => pairs,
            _ => {
                return Err(FetchError::MalformedResponse(
                    "expected an array of pairs".to_string(),
                ))
            }
        },
        _ => {
            return Err(FetchError::MalformedResponse(
                "expected an array of pairs".to_string(),
            ))
        }
    };
    let Some(first) = pairs.first() else {
        return Err(FetchError::MalformedResponse("no pairs for token".to_string()));
    };
    if !first.is_object() {
        return Err(FetchError::MalformedResponse("pair is not an object".to_string()));
    }

    let market_cap_usd = first.get("marketCap").and_then(value_to_f64);
    let price_usd = first.get("priceUsd").and_then(value_to_f64);
    Ok(MarketSnapshot::new(market_cap_usd, price_usd, fetched_at))
}

fn value_to_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_joins_endpoint_chain_and_token() {
        let cfg = MarketFeedConfig {
            endpoint: "https://example.test/".to_string(),
            chain: "solana".to_string(),
            token_address: "MINT".to_string(),
            ..MarketFeedConfig::default()
        };
        assert_eq!(cfg.url(), "https://example.test/tokens/v1/solana/MINT");
    }

    #[test]
    fn unset_token_takes_fallback() {
        let cfg = MarketFeedConfig::default().with_token_if_unset("MINT");
        assert_eq!(cfg.token_address, "MINT");
        let cfg = cfg.with_token_if_unset("OTHER");
        assert_eq!(cfg.token_address, "MINT");
    }

    #[test]
    fn parses_first_pair() {
        let payload = json!([
            {"chainId": "solana", "marketCap": 61234.5, "priceUsd": "0.00006123"},
            {"chainId": "solana", "marketCap": 1.0, "priceUsd": "1.0"}
        ]);
        let snap = parse_pairs_payload(&payload, Utc::now()).expect("parse");
        assert_eq!(snap.market_cap_usd, Some(61234.5));
        assert_eq!(snap.price_usd, Some(0.00006123));
    }

    #[test]
    fn missing_fields_are_unknown_not_errors() {
        let payload = json!([{"chainId": "solana"}]);
        let snap = parse_pairs_payload(&payload, Utc::now()).expect("parse");
        assert_eq!(snap.market_cap_usd, None);
        assert_eq!(snap.price_usd, None);

        let payload = json!([{"marketCap": "n/a", "priceUsd": "0.5"}]);
        let snap = parse_pairs_payload(&payload, Utc::now()).expect("parse");
        assert_eq!(snap.market_cap_usd, None);
        assert_eq!(snap.price_usd, Some(0.5));
    }

    #[test]
    fn accepts_wrapped_pairs_object() {
        let payload = json!({"pairs": [{"marketCap": 10, "priceUsd": "2"}]});
        let snap = parse_pairs_payload(&payload, Utc::now()).expect("parse");
        assert_eq!(snap.market_cap_usd, Some(10.0));
    }

    #[test]
    fn empty_or_wrong_shape_is_malformed() {
        for payload in [json!([]), json!({"pairs": null}), json!("oops"), json!([1])] {
            let err = parse_pairs_payload(&payload, Utc::now()).expect_err("malformed");
            assert_eq!(err.code(), "malformed_response", "{payload}");
        }
    }
}
