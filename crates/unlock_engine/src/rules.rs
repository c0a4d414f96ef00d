use std::collections::BTreeSet;

use core_types::{
    AccessState, AppViewState, DenialReason, PuzzleDescriptor, TokenHolding, WalletSession,
};

/// Unknown, negative or non-finite caps count as zero.
pub fn effective_cap(market_cap_usd: Option<f64>) -> f64 {
    market_cap_usd
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

pub fn compute_unlocked_puzzles(
    market_cap_usd: Option<f64>,
    puzzles: &[PuzzleDescriptor],
) -> BTreeSet<u32> {
    let cap = effective_cap(market_cap_usd);
    puzzles
        .iter()
        .filter(|p| cap >= p.unlock_threshold_usd)
        .map(|p| p.id)
        .collect()
}

/// Fail-closed: unknown balance, a missing holding or a disconnected wallet
/// never grants access.
pub fn compute_access_granted(
    session: &WalletSession,
    holding: Option<&TokenHolding>,
    minimum_required_balance: f64,
) -> bool {
    if session.owner().is_none() {
        return false;
    }
    match holding.and_then(|h| h.balance) {
        Some(balance) => balance.is_finite() && balance >= minimum_required_balance,
        None => false,
    }
}

pub fn compute_access_state(
    session: &WalletSession,
    holding: Option<&TokenHolding>,
    minimum_required_balance: f64,
) -> AccessState {
    if !session.connected {
        return AccessState::Disconnected;
    }
    if session.address.is_none() {
        return AccessState::ConnectedUnchecked;
    }
    match holding {
        None => AccessState::ConnectedUnchecked,
        Some(_) if compute_access_granted(session, holding, minimum_required_balance) => {
            AccessState::ConnectedSufficient
        }
        Some(_) => AccessState::ConnectedInsufficient,
    }
}

/// No reason is given while a connected wallet's first read is pending;
/// access stays denied but neither message applies yet.
pub fn denial_reason(session: &WalletSession, access: AccessState) -> Option<DenialReason> {
    if session.owner().is_none() {
        return Some(DenialReason::ConnectWallet);
    }
    match access {
        AccessState::ConnectedSufficient | AccessState::ConnectedUnchecked => None,
        AccessState::Disconnected => Some(DenialReason::ConnectWallet),
        AccessState::ConnectedInsufficient => Some(DenialReason::InsufficientBalance),
    }
}

pub fn unlock_progress_pct(market_cap_usd: Option<f64>, progress_target_usd: f64) -> f64 {
    if !progress_target_usd.is_finite() || progress_target_usd <= 0.0 {
        return 0.0;
    }
    (effective_cap(market_cap_usd) / progress_target_usd * 100.0).clamp(0.0, 100.0)
}

/// Cheapest still-locked puzzle, ties broken by id.
pub fn next_unlock(
    market_cap_usd: Option<f64>,
    puzzles: &[PuzzleDescriptor],
) -> Option<PuzzleDescriptor> {
    let cap = effective_cap(market_cap_usd);
    puzzles
        .iter()
        .filter(|p| cap < p.unlock_threshold_usd)
        .min_by(|a, b| {
            a.unlock_threshold_usd
                .total_cmp(&b.unlock_threshold_usd)
                .then(a.id.cmp(&b.id))
        })
        .copied()
}

/// Denied requests return the state unchanged.
pub fn open_puzzle(state: &AppViewState, id: u32) -> AppViewState {
    if state.access_denied || !state.unlocked_puzzle_ids.contains(&id) {
        return state.clone();
    }
    AppViewState {
        open_puzzle_id: Some(id),
        ..state.clone()
    }
}

pub fn close_puzzle(state: &AppViewState) -> AppViewState {
    AppViewState {
        open_puzzle_id: None,
        ..state.clone()
    }
}
