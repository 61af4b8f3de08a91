//! Exception handlers (deviations, deferrals, waivers)

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
use chrono::{DateTime, Utc};
use govledger_core::{
    CreateException, Exception, ExceptionFilter, ExceptionScope, ExceptionTransition,
    RecordPage, ResolveException,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ExceptionScopeRequest {
    #[serde(default)]
    pub loop_id: Option<String>,
    #[serde(default)]
    pub candidate_id: Option<String>,
    #[serde(default)]
    pub oracle_id: Option<String>,
    #[serde(default)]
    pub artifact_refs: Vec<RefRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreateExceptionRequest {
    pub kind: String,
    #[serde(default)]
    pub scope: ExceptionScopeRequest,
    pub rationale: String,
    #[serde(default)]
    pub target_description: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn create_exception(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    body: Result<Json<CreateExceptionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Exception>)> {
    let Json(body) = body?;
    let command = CreateException {
        kind: body.kind,
        scope: ExceptionScope {
            loop_id: body.scope.loop_id,
            candidate_id: body.scope.candidate_id,
            oracle_id: body.scope.oracle_id,
            artifact_refs: typed_refs(body.scope.artifact_refs),
        },
        rationale: body.rationale,
        target_description: body.target_description,
        expires_at: body.expires_at,
    };
    let exception = state
        .ledger
        .governance()
        .create_exception(&actor, command)
        .await?;
    Ok((StatusCode::CREATED, Json(exception)))
}

pub async fn list_exceptions(
    State(state): State<AppState>,
    query: Result<Query<ExceptionFilter>, QueryRejection>,
) -> ApiResult<Json<RecordPage<Exception>>> {
    let Query(filter) = query?;
    Ok(Json(state.ledger.governance().list_exceptions(&filter).await?))
}

pub async fn get_exception(
    State(state): State<AppState>,
    Path(exception_id): Path<String>,
) -> ApiResult<Json<Exception>> {
    Ok(Json(state.ledger.governance().get_exception(&exception_id).await?))
}

/// CREATED → ACTIVE; dependents of the exception are marked stale.
pub async fn activate_exception(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Path(exception_id): Path<String>,
) -> ApiResult<Json<ExceptionTransition>> {
    Ok(Json(
        state
            .ledger
            .activate_exception(&actor, &exception_id)
            .await?,
    ))
}

/// ACTIVE → RESOLVED. The body is optional.
pub async fn resolve_exception(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Path(exception_id): Path<String>,
    body: Option<Json<ResolveException>>,
) -> ApiResult<Json<ExceptionTransition>> {
    let command = body.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(
        state
            .ledger
            .governance()
            .resolve_exception(&actor, &exception_id, command)
            .await?,
    ))
}
