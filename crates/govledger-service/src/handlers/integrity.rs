use crate::auth::Authenticated;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use govledger_core::IntegrityCondition;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RecordConditionRequest {
    pub oracle_id: String,
    pub condition: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordConditionResponse {
    pub oracle_id: String,
    pub condition: IntegrityCondition,
    pub event_id: String,
}

/// Record that an oracle's failures represent an integrity condition.
pub async fn record_integrity_condition(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    body: Result<Json<RecordConditionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RecordConditionResponse>)> {
    let Json(body) = body?;
    let condition: IntegrityCondition = body.condition.parse()?;
    let event_id = state
        .ledger
        .record_integrity_condition(&actor, &body.oracle_id, condition, body.detail)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RecordConditionResponse {
            oracle_id: body.oracle_id,
            condition,
            event_id,
        }),
    ))
}
