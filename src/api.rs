use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::model::HistoryEntry;
use crate::status::{StatusBoard, StatusSnapshot};
use crate::store::{clamp_history_limit, RuleStore, DEFAULT_HISTORY_LIMIT};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn RuleStore>,
    board: Arc<StatusBoard>,
}

impl AppState {
    pub fn new(store: Arc<dyn RuleStore>, board: Arc<StatusBoard>) -> Self {
        Self { store, board }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/history", get(history))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(serde::Serialize)]
struct RuleCounts {
    total: usize,
    enabled: usize,
}

#[derive(serde::Serialize)]
struct StatusOut {
    #[serde(flatten)]
    snapshot: StatusSnapshot,
    rules: RuleCounts,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusOut>, ApiError> {
    let rules = state.store.list_rules().map_err(internal)?;
    let enabled = rules.iter().filter(|r| r.enabled).count();
    Ok(Json(StatusOut {
        snapshot: state.board.snapshot(),
        rules: RuleCounts {
            total: rules.len(),
            enabled,
        },
    }))
}

#[derive(serde::Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Query(p): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let limit = clamp_history_limit(p.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    let rows = state.store.recent_history(limit).map_err(internal)?;
    Ok(Json(rows))
}
