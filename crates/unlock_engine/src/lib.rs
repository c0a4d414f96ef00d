use std::collections::BTreeSet;

use core_types::{
    AccessState, Address, AppViewState, Denial, FetchError, GateEvent, MarketSnapshot,
    PuzzleDescriptor, SnapshotRejection, TokenHolding, WalletSession,
};
use infra_bus::RingBus;
use serde::{Deserialize, Serialize};

mod config;
pub mod rules;

pub use config::{default_ladder, ConfigError, GateConfig, DEFAULT_MINT};
pub use rules::{
    close_puzzle, compute_access_granted, compute_access_state, compute_unlocked_puzzles,
    open_puzzle,
};

/// A balance read the caller must perform and hand back to
/// [`UnlockEngine::refresh_token_holding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRequest {
    pub epoch: u64,
    pub seq: u64,
    pub owner: Address,
    pub mint: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketApply {
    Applied,
    /// Fetch failed; the previous snapshot stays in force.
    Retained,
    /// A later poll already landed.
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PuzzleStatus {
    pub id: u32,
    pub unlock_threshold_usd: f64,
    pub unlocked: bool,
    pub open: bool,
}

struct Before {
    unlocked: BTreeSet<u32>,
    access: AccessState,
}

/// Single-writer state container for the gate. Inputs are replaced wholesale;
/// the view is rebuilt from them on every read.
pub struct UnlockEngine {
    cfg: GateConfig,
    ladder: Vec<PuzzleDescriptor>,
    bus: RingBus<GateEvent>,
    snapshot: Option<MarketSnapshot>,
    last_known_cap: Option<f64>,
    issued_market_seq: u64,
    applied_market_seq: u64,
    session: WalletSession,
    session_epoch: u64,
    holding: Option<TokenHolding>,
    issued_balance_seq: u64,
    applied_balance_seq: u64,
    open_puzzle_id: Option<u32>,
}

impl UnlockEngine {
    pub fn new(cfg: GateConfig, bus: RingBus<GateEvent>) -> Result<Self, ConfigError> {
        for warning in cfg.validate()? {
            tracing::warn!(%warning, "gate config");
        }
        let ladder = cfg.sorted_ladder();
        Ok(Self {
            cfg,
            ladder,
            bus,
            snapshot: None,
            last_known_cap: None,
            issued_market_seq: 0,
            applied_market_seq: 0,
            session: WalletSession::disconnected(),
            session_epoch: 0,
            holding: None,
            issued_balance_seq: 0,
            applied_balance_seq: 0,
            open_puzzle_id: None,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.cfg
    }

    pub fn ladder(&self) -> &[PuzzleDescriptor] {
        &self.ladder
    }

    pub fn snapshot(&self) -> Option<&MarketSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn session(&self) -> &WalletSession {
        &self.session
    }

    pub fn holding(&self) -> Option<&TokenHolding> {
        self.holding.as_ref()
    }

    pub fn bus(&self) -> &RingBus<GateEvent> {
        &self.bus
    }

    pub fn unlocked_puzzle_ids(&self) -> BTreeSet<u32> {
        compute_unlocked_puzzles(self.last_known_cap, &self.ladder)
    }

    pub fn access_granted(&self) -> bool {
        compute_access_granted(
            &self.session,
            self.holding.as_ref(),
            self.cfg.minimum_required_balance,
        )
    }

    pub fn access_state(&self) -> AccessState {
        compute_access_state(
            &self.session,
            self.holding.as_ref(),
            self.cfg.minimum_required_balance,
        )
    }

    pub fn view(&self) -> AppViewState {
        let access = self.access_state();
        let granted = self.access_granted();
        let denial = rules::denial_reason(&self.session, access).map(|reason| Denial {
            reason,
            message: reason.message(self.cfg.minimum_required_balance),
        });
        AppViewState {
            is_wallet_connected: self.session.connected,
            has_sufficient_balance: granted,
            unlocked_puzzle_ids: self.unlocked_puzzle_ids(),
            open_puzzle_id: self.open_puzzle_id,
            access_denied: !granted,
            access_state: access,
            denial,
            // the cap unlocks are computed from, not the latest raw field
            market_cap_usd: self.last_known_cap,
            price_usd: self.snapshot.as_ref().and_then(|s| s.price_usd),
            unlock_progress_pct: rules::unlock_progress_pct(
                self.last_known_cap,
                self.cfg.progress_target_usd,
            ),
            next_unlock: rules::next_unlock(self.last_known_cap, &self.ladder),
        }
    }

    pub fn puzzle_board(&self) -> Vec<PuzzleStatus> {
        let unlocked = self.unlocked_puzzle_ids();
        self.ladder
            .iter()
            .map(|p| PuzzleStatus {
                id: p.id,
                unlock_threshold_usd: p.unlock_threshold_usd,
                unlocked: unlocked.contains(&p.id),
                open: self.open_puzzle_id == Some(p.id),
            })
            .collect()
    }

    pub fn begin_market_poll(&mut self) -> u64 {
        self.issued_market_seq += 1;
        self.issued_market_seq
    }

    pub fn refresh_market_snapshot(
        &mut self,
        seq: u64,
        result: Result<MarketSnapshot, FetchError>,
    ) -> MarketApply {
        if seq <= self.applied_market_seq {
            tracing::debug!(seq, applied = self.applied_market_seq, "dropping superseded poll");
            self.emit(GateEvent::MarketSnapshotRejected {
                seq,
                rejection: SnapshotRejection::Superseded,
                error: result.err().map(|e| e.to_string()),
            });
            return MarketApply::Stale;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(seq, error = %err, "market poll failed; keeping previous snapshot");
                self.emit(GateEvent::MarketSnapshotRejected {
                    seq,
                    rejection: SnapshotRejection::FetchFailed,
                    error: Some(err.to_string()),
                });
                return MarketApply::Retained;
            }
        };

        let before = self.before();
        self.applied_market_seq = seq;
        if snapshot.market_cap_usd.is_some() {
            self.last_known_cap = snapshot.market_cap_usd;
        }
        self.emit(GateEvent::MarketSnapshotApplied {
            seq,
            market_cap_usd: snapshot.market_cap_usd,
            price_usd: snapshot.price_usd,
        });
        self.snapshot = Some(snapshot);
        self.commit(before);
        MarketApply::Applied
    }

    /// Returns the balance read to perform when the new session has an owner.
    pub fn set_wallet_session(&mut self, session: WalletSession) -> Option<BalanceRequest> {
        if session == self.session {
            return None;
        }
        let before = self.before();
        self.session = session;
        self.session_epoch += 1;
        self.holding = None;
        self.emit(GateEvent::SessionChanged {
            epoch: self.session_epoch,
            connected: self.session.connected,
            address: self.session.address.clone(),
        });
        self.commit(before);
        self.issue_balance_request()
    }

    pub fn begin_balance_refresh(&mut self) -> Option<BalanceRequest> {
        self.issue_balance_request()
    }

    /// Returns `false` when the result belongs to an older session or an
    /// older read and was dropped.
    pub fn refresh_token_holding(
        &mut self,
        request: &BalanceRequest,
        result: Result<TokenHolding, FetchError>,
    ) -> bool {
        if request.epoch != self.session_epoch || request.seq <= self.applied_balance_seq {
            tracing::debug!(
                epoch = request.epoch,
                seq = request.seq,
                current_epoch = self.session_epoch,
                "dropping balance result for superseded request"
            );
            return false;
        }

        let before = self.before();
        self.applied_balance_seq = request.seq;
        let mut error = None;
        let holding = match result {
            Ok(holding) if holding.mint == self.cfg.mint => holding,
            Ok(holding) => {
                tracing::warn!(got = %holding.mint, want = %self.cfg.mint, "balance for wrong mint");
                TokenHolding::unknown(self.cfg.mint.clone())
            }
            Err(err) => {
                tracing::warn!(owner = %request.owner, error = %err, "balance read failed");
                error = Some(err.to_string());
                TokenHolding::unknown(self.cfg.mint.clone())
            }
        };
        self.emit(GateEvent::BalanceRefreshed {
            epoch: request.epoch,
            seq: request.seq,
            balance: holding.balance,
            error,
        });
        self.holding = Some(holding);
        self.commit(before);
        true
    }

    /// Denied opens are ignored, never an error.
    pub fn open_puzzle(&mut self, id: u32) -> bool {
        let view = self.view();
        let next = open_puzzle(&view, id);
        if next.open_puzzle_id != Some(id) {
            self.emit(GateEvent::PuzzleOpenIgnored {
                id,
                locked: !view.unlocked_puzzle_ids.contains(&id),
                access_denied: view.access_denied,
            });
            return false;
        }
        if let Some(prev) = self.open_puzzle_id.filter(|prev| *prev != id) {
            self.emit(GateEvent::PuzzleClosed { id: prev });
        }
        if self.open_puzzle_id != Some(id) {
            self.emit(GateEvent::PuzzleOpened { id });
        }
        self.open_puzzle_id = next.open_puzzle_id;
        true
    }

    pub fn close_puzzle(&mut self) -> Option<u32> {
        let closed = self.open_puzzle_id.take();
        if let Some(id) = closed {
            self.emit(GateEvent::PuzzleClosed { id });
        }
        closed
    }

    fn issue_balance_request(&mut self) -> Option<BalanceRequest> {
        let owner = self.session.owner()?.clone();
        self.issued_balance_seq += 1;
        Some(BalanceRequest {
            epoch: self.session_epoch,
            seq: self.issued_balance_seq,
            owner,
            mint: self.cfg.mint.clone(),
        })
    }

    fn before(&self) -> Before {
        Before {
            unlocked: self.unlocked_puzzle_ids(),
            access: self.access_state(),
        }
    }

    fn commit(&mut self, before: Before) {
        let cap = rules::effective_cap(self.last_known_cap);
        let unlocked = self.unlocked_puzzle_ids();
        for id in unlocked.difference(&before.unlocked) {
            self.emit(GateEvent::PuzzleUnlocked {
                id: *id,
                market_cap_usd: cap,
            });
        }
        for id in before.unlocked.difference(&unlocked) {
            self.emit(GateEvent::PuzzleRelocked {
                id: *id,
                market_cap_usd: cap,
            });
        }

        let access = self.access_state();
        if access != before.access {
            self.emit(GateEvent::AccessStateChanged {
                from: before.access,
                to: access,
            });
        }

        if let Some(id) = self.open_puzzle_id {
            if !self.access_granted() || !unlocked.contains(&id) {
                self.close_puzzle();
            }
        }
    }

    fn emit(&self, event: GateEvent) {
        tracing::info!(event = event.kind(), ?event, "gate transition");
        self.bus.emit(event);
    }
}
