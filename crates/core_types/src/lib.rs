use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address length {0} outside 32..=44")]
    Length(usize),
    #[error("address contains non-base58 character {0:?}")]
    Charset(char),
}

/// Base58 public key of a wallet or token mint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(SmolStr);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AddressError::Empty);
        }
        if !(32..=44).contains(&raw.len()) {
            return Err(AddressError::Length(raw.len()));
        }
        if let Some(bad) = raw.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
            return Err(AddressError::Charset(bad));
        }
        Ok(Self(SmolStr::new(raw)))
    }

    /// For compile-time constants; the value is not validated here.
    pub const fn from_static(raw: &'static str) -> Self {
        Self(SmolStr::new_static(raw))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub market_cap_usd: Option<f64>,
    pub price_usd: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Negative or non-finite readings are stored as unknown.
    pub fn new(market_cap_usd: Option<f64>, price_usd: Option<f64>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            market_cap_usd: market_cap_usd.filter(|v| v.is_finite() && *v >= 0.0),
            price_usd: price_usd.filter(|v| v.is_finite() && *v >= 0.0),
            fetched_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WalletSession {
    pub connected: bool,
    #[serde(default)]
    pub address: Option<Address>,
}

impl WalletSession {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(address: Address) -> Self {
        Self {
            connected: true,
            address: Some(address),
        }
    }

    /// Owner to query balances for; `None` unless connected with a key.
    pub fn owner(&self) -> Option<&Address> {
        if self.connected {
            self.address.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenHolding {
    pub mint: Address,
    pub balance: Option<f64>,
}

impl TokenHolding {
    pub fn known(mint: Address, balance: f64) -> Self {
        Self {
            mint,
            balance: Some(balance).filter(|v| v.is_finite() && *v >= 0.0),
        }
    }

    pub fn unknown(mint: Address) -> Self {
        Self {
            mint,
            balance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PuzzleDescriptor {
    pub id: u32,
    pub unlock_threshold_usd: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    Disconnected,
    ConnectedUnchecked,
    ConnectedSufficient,
    ConnectedInsufficient,
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Disconnected => "disconnected",
            Self::ConnectedUnchecked => "connected_unchecked",
            Self::ConnectedSufficient => "connected_sufficient",
            Self::ConnectedInsufficient => "connected_insufficient",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    ConnectWallet,
    InsufficientBalance,
}

impl DenialReason {
    pub fn message(&self, minimum_required_balance: f64) -> String {
        match self {
            Self::ConnectWallet => "Connect your wallet to play.".to_string(),
            Self::InsufficientBalance => format!(
                "Insufficient balance: you must hold at least {} tokens to play.",
                format_units(minimum_required_balance)
            ),
        }
    }
}

/// Whole-unit amounts with thousands separators, e.g. `100,000`.
pub fn format_units(value: f64) -> String {
    let whole = value.max(0.0).floor() as u64;
    let digits = whole.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Denial {
    pub reason: DenialReason,
    pub message: String,
}

/// Projection handed to the presentation layer. Rebuilt from inputs on every
/// read, never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppViewState {
    pub is_wallet_connected: bool,
    pub has_sufficient_balance: bool,
    pub unlocked_puzzle_ids: BTreeSet<u32>,
    pub open_puzzle_id: Option<u32>,
    pub access_denied: bool,
    pub access_state: AccessState,
    pub denial: Option<Denial>,
    pub market_cap_usd: Option<f64>,
    pub price_usd: Option<f64>,
    pub unlock_progress_pct: f64,
    pub next_unlock: Option<PuzzleDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("no wallet connected")]
    NoWalletConnected,
    #[error("no token account for the configured mint")]
    NoMatchingTokenAccount,
}

impl FetchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NetworkFailure(_) => "network_failure",
            Self::MalformedResponse(_) => "malformed_response",
            Self::NoWalletConnected => "no_wallet_connected",
            Self::NoMatchingTokenAccount => "no_matching_token_account",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotRejection {
    /// Result from a poll older than the last applied one.
    Superseded,
    /// Fetch failed; previous snapshot retained.
    FetchFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GateEvent {
    MarketSnapshotApplied {
        seq: u64,
        market_cap_usd: Option<f64>,
        price_usd: Option<f64>,
    },
    MarketSnapshotRejected {
        seq: u64,
        rejection: SnapshotRejection,
        #[serde(default)]
        error: Option<String>,
    },
    PuzzleUnlocked {
        id: u32,
        market_cap_usd: f64,
    },
    PuzzleRelocked {
        id: u32,
        market_cap_usd: f64,
    },
    SessionChanged {
        epoch: u64,
        connected: bool,
        address: Option<Address>,
    },
    AccessStateChanged {
        from: AccessState,
        to: AccessState,
    },
    BalanceRefreshed {
        epoch: u64,
        seq: u64,
        balance: Option<f64>,
        #[serde(default)]
        error: Option<String>,
    },
    PuzzleOpened {
        id: u32,
    },
    PuzzleOpenIgnored {
        id: u32,
        locked: bool,
        access_denied: bool,
    },
    PuzzleClosed {
        id: u32,
    },
}

impl GateEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarketSnapshotApplied { .. } => "market_snapshot_applied",
            Self::MarketSnapshotRejected { .. } => "market_snapshot_rejected",
            Self::PuzzleUnlocked { .. } => "puzzle_unlocked",
            Self::PuzzleRelocked { .. } => "puzzle_relocked",
            Self::SessionChanged { .. } => "session_changed",
            Self::AccessStateChanged { .. } => "access_state_changed",
            Self::BalanceRefreshed { .. } => "balance_refreshed",
            Self::PuzzleOpened { .. } => "puzzle_opened",
            Self::PuzzleOpenIgnored { .. } => "puzzle_open_ignored",
            Self::PuzzleClosed { .. } => "puzzle_closed",
        }
    }
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<MarketSnapshot, FetchError>;
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn fetch_holding(&self, owner: &Address, mint: &Address)
        -> Result<TokenHolding, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "8YTwudT2oTGQHK6Kv1MZcpbuFYu12iYMDbSKcpREpump";

    #[test]
    fn address_parses_base58_keys() {
        let addr = Address::parse(MINT).expect("valid mint");
        assert_eq!(addr.as_str(), MINT);
        assert_eq!(addr.to_string(), MINT);
    }

    #[test]
    fn address_rejects_bad_input() {
        assert_eq!(Address::parse("  "), Err(AddressError::Empty));
        assert_eq!(Address::parse("abc"), Err(AddressError::Length(3)));
        let with_zero = format!("0{}", &MINT[1..]);
        assert_eq!(Address::parse(&with_zero), Err(AddressError::Charset('0')));
    }

    #[test]
    fn wallet_session_json_accepts_missing_address() {
        let session: WalletSession =
            serde_json::from_str(r#"{"connected":false}"#).expect("deserialize");
        assert_eq!(session, WalletSession::disconnected());
        assert!(session.owner().is_none());

        let bad = serde_json::from_str::<WalletSession>(r#"{"connected":true,"address":"nope"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn snapshot_normalises_invalid_readings() {
        let snap = MarketSnapshot::new(Some(-5.0), Some(f64::NAN), Utc::now());
        assert_eq!(snap.market_cap_usd, None);
        assert_eq!(snap.price_usd, None);
    }

    #[test]
    fn denial_messages_distinguish_causes() {
        let connect = DenialReason::ConnectWallet.message(100_000.0);
        let insufficient = DenialReason::InsufficientBalance.message(100_000.0);
        assert!(connect.contains("Connect your wallet"));
        assert!(insufficient.contains("100,000"));
        assert_ne!(connect, insufficient);
    }

    #[test]
    fn format_units_groups_thousands() {
        assert_eq!(format_units(0.0), "0");
        assert_eq!(format_units(999.9), "999");
        assert_eq!(format_units(1_000.0), "1,000");
        assert_eq!(format_units(1_234_567.0), "1,234,567");
    }

    #[test]
    fn gate_event_json_is_tagged() {
        let ev = GateEvent::PuzzleOpened { id: 2 };
        let raw = serde_json::to_string(&ev).expect("serialize");
        assert!(raw.contains(r#""event":"puzzle_opened""#));
        let parsed: GateEvent = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(parsed, ev);
        assert_eq!(parsed.kind(), "puzzle_opened");
    }
}
