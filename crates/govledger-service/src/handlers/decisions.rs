//! Decision handlers

use super::{typed_refs, RefRequest};
use crate::auth::Authenticated;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use govledger_core::{Decision, DecisionFilter, RecordDecision, RecordPage};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct RecordDecisionRequest {
    pub trigger: String,
    #[serde(default)]
    pub scope: Value,
    pub decision: String,
    pub rationale: String,
    #[serde(default)]
    pub subject_refs: Vec<RefRequest>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub exceptions_acknowledged: Vec<String>,
    #[serde(default)]
    pub is_precedent: bool,
    #[serde(default)]
    pub applicability: Option<String>,
}

pub async fn record_decision(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    body: Result<Json<RecordDecisionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Decision>)> {
    let Json(body) = body?;
    let command = RecordDecision {
        trigger: body.trigger,
        scope: body.scope,
        decision: body.decision,
        rationale: body.rationale,
        subject_refs: typed_refs(body.subject_refs),
        evidence_refs: body.evidence_refs,
        exceptions_acknowledged: body.exceptions_acknowledged,
        is_precedent: body.is_precedent,
        applicability: body.applicability,
    };
    let decision = state
        .ledger
        .governance()
        .record_decision(&actor, command)
        .await?;
    Ok((StatusCode::CREATED, Json(decision)))
}

pub async fn list_decisions(
    State(state): State<AppState>,
    query: Result<Query<DecisionFilter>, QueryRejection>,
) -> ApiResult<Json<RecordPage<Decision>>> {
    let Query(filter) = query?;
    Ok(Json(state.ledger.governance().list_decisions(&filter).await?))
}

pub async fn get_decision(
    State(state): State<AppState>,
    Path(decision_id): Path<String>,
) -> ApiResult<Json<Decision>> {
    Ok(Json(state.ledger.governance().get_decision(&decision_id).await?))
}
