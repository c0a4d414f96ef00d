use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use core_types::{Address, BalanceSource, FetchError, TokenHolding};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RpcConfig {
    pub endpoint: String,
    pub commitment: String,
    pub request_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Reads SPL token balances through `getTokenAccountsByOwner`.
pub struct SolanaRpcBalance {
    http: Client,
    cfg: RpcConfig,
    next_id: AtomicU64,
}

impl SolanaRpcBalance {
    pub fn new(cfg: RpcConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_millis(cfg.request_timeout_ms.max(500)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            cfg,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn cfg(&self) -> &RpcConfig {
        &self.cfg
    }
}

pub fn build_request(id: u64, owner: &Address, mint: &Address, commitment: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "getTokenAccountsByOwner",
        "params": [
            owner.as_str(),
            { "mint": mint.as_str() },
            { "encoding": "jsonParsed", "commitment": commitment }
        ]
    })
}

#[async_trait]
impl BalanceSource for SolanaRpcBalance {
    async fn fetch_holding(
        &self,
        owner: &Address,
        mint: &Address,
    ) -> Result<TokenHolding, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = build_request(id, owner, mint, &self.cfg.commitment);

        let res = self
            .http
            .post(&self.cfg.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FetchError::NetworkFailure(format!("rpc request: {e}")))?;
        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::NetworkFailure(format!("rpc status {status}")));
        }
        let body: Value = res
            .json()
            .await
            .map_err(|e| FetchError::MalformedResponse(format!("rpc json: {e}")))?;

        let balance = parse_token_accounts(&body, mint)?;
        tracing::debug!(%owner, %mint, balance, "token balance fetched");
        Ok(TokenHolding::known(mint.clone(), balance))
    }
}

/// Sums the UI-normalised balance of every account holding `mint`.
pub fn parse_token_accounts(body: &Value, mint: &Address) -> Result<f64, FetchError> {
    if let Some(err) = body.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown rpc error");
        return Err(FetchError::NetworkFailure(format!("rpc error {code}: {message}")));
    }

    let Some(accounts) = body.pointer("/result/value").and_then(Value::as_array) else {
        return Err(FetchError::MalformedResponse(
            "missing result.value array".to_string(),
        ));
    };

    let mut matched = false;
    let mut total = 0.0;
    for account in accounts {
        let Some(info) = account.pointer("/account/data/parsed/info") else {
            continue;
        };
        if info.get("mint").and_then(Value::as_str) != Some(mint.as_str()) {
            continue;
        }
        let Some(amount) = info.get("tokenAmount").and_then(ui_amount) else {
            return Err(FetchError::MalformedResponse(
                "token account without a readable amount".to_string(),
            ));
        };
        matched = true;
        total += amount;
    }

    if !matched {
        return Err(FetchError::NoMatchingTokenAccount);
    }
    Ok(total)
}

fn ui_amount(token_amount: &Value) -> Option<f64> {
    if let Some(v) = token_amount.get("uiAmount").and_then(Value::as_f64) {
        return Some(v);
    }
    if let Some(v) = token_amount
        .get("uiAmountString")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
    {
        return Some(v);
    }
    // uiAmount is null for amounts beyond f64 precision on some nodes
    let raw = token_amount
        .get("amount")
        .and_then(Value::as_str)?
        .parse::<f64>()
        .ok()?;
    let decimals = token_amount.get("decimals").and_then(Value::as_u64)?;
    Some(raw / 10f64.powi(decimals.min(30) as i32))
}
