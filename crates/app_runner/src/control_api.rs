use super::*;

pub(super) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/state", get(view_state))
        .route("/puzzles", get(puzzles))
        .route("/wallet/session", post(wallet_session))
        .route("/puzzles/{id}/open", post(open_puzzle))
        .route("/puzzles/close", post(close_puzzle))
        .route("/control/refresh_market", post(refresh_market))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub(super) struct HealthResp {
    pub(super) status: &'static str,
    pub(super) has_snapshot: bool,
    pub(super) subscribers: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct ActionResp<T: Serialize> {
    pub(super) ok: bool,
    pub(super) detail: T,
    pub(super) state: AppViewState,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResp> {
    Json(HealthResp {
        status: "ok",
        has_snapshot: state.engine.read().snapshot().is_some(),
        subscribers: state.bus.receiver_count(),
    })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [("content-type", "text/plain; charset=utf-8")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

pub(super) async fn view_state(State(state): State<AppState>) -> Json<AppViewState> {
    Json(state.view())
}

pub(super) async fn puzzles(State(state): State<AppState>) -> Json<Vec<PuzzleStatus>> {
    Json(state.engine.read().puzzle_board())
}

/// The balance read runs in the background; poll `/state` for the outcome.
pub(super) async fn wallet_session(
    State(state): State<AppState>,
    Json(session): Json<WalletSession>,
) -> Json<ActionResp<bool>> {
    let balance_check_started = state.balances.set_session(session).is_some();
    Json(ActionResp {
        ok: true,
        detail: balance_check_started,
        state: state.view(),
    })
}

/// A denied open is not an error: the state comes back unchanged with `ok: false`.
pub(super) async fn open_puzzle(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Json<ActionResp<u32>> {
    let ok = state.engine.write().open_puzzle(id);
    Json(ActionResp {
        ok,
        detail: id,
        state: state.view(),
    })
}

pub(super) async fn close_puzzle(State(state): State<AppState>) -> Json<ActionResp<Option<u32>>> {
    let closed = state.engine.write().close_puzzle();
    Json(ActionResp {
        ok: true,
        detail: closed,
        state: state.view(),
    })
}

pub(super) async fn refresh_market(
    State(state): State<AppState>,
) -> Json<ActionResp<PollOutcome>> {
    let outcome = state.market.poll_once().await;
    Json(ActionResp {
        ok: outcome == PollOutcome::Applied,
        detail: outcome,
        state: state.view(),
    })
}
