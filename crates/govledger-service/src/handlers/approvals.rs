//! Approval handlers

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
use govledger_core::{Approval, ApprovalFilter, RecordApproval, RecordPage};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RecordApprovalRequest {
    pub portal_id: String,
    pub decision: String,
    #[serde(default)]
    pub subject_refs: Vec<RefRequest>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub exceptions_acknowledged: Vec<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Record a binding approval. HUMAN only.
pub async fn record_approval(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    body: Result<Json<RecordApprovalRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Approval>)> {
    let Json(body) = body?;
    let command = RecordApproval {
        portal_id: body.portal_id,
        decision: body.decision,
        subject_refs: typed_refs(body.subject_refs),
        evidence_refs: body.evidence_refs,
        exceptions_acknowledged: body.exceptions_acknowledged,
        rationale: body.rationale,
    };
    let approval = state
        .ledger
        .governance()
        .record_approval(&actor, command)
        .await?;
    Ok((StatusCode::CREATED, Json(approval)))
}

pub async fn list_approvals(
    State(state): State<AppState>,
    query: Result<Query<ApprovalFilter>, QueryRejection>,
) -> ApiResult<Json<RecordPage<Approval>>> {
    let Query(filter) = query?;
    Ok(Json(state.ledger.governance().list_approvals(&filter).await?))
}

pub async fn get_approval(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
) -> ApiResult<Json<Approval>> {
    Ok(Json(state.ledger.governance().get_approval(&approval_id).await?))
}
