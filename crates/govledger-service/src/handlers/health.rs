//! Health handler

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{extract::State, Json};
use govledger_core::EventStore;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: String,
    pub storage_backend: &'static str,
    pub events: u64,
    pub uptime_secs: i64,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let store = state.ledger.store();
    Ok(Json(HealthResponse {
        status: "ok",
        service: "govledger",
        version: state.version.clone(),
        storage_backend: store.backend_label().await,
        events: store.head().await?,
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}
