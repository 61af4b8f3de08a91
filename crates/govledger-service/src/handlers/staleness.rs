//! Staleness handlers: mark, list, inspect and resolve markers.

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
use govledger_core::{
    EntityRef, MarkOutcome, MarkRequest, ResolutionKind, ResolveOutcome, ResolveRequest,
    StaleMarker, StalenessReason,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct MarkStalenessRequest {
    pub root_ref: EntityRef,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub reason_detail: Option<String>,
    #[serde(default)]
    pub max_depth: Option<u32>,
}

pub async fn mark_staleness(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    body: Result<Json<MarkStalenessRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MarkOutcome>)> {
    let Json(body) = body?;
    let reason_code = match body.reason_code.as_deref() {
        Some(code) => code.parse::<StalenessReason>()?,
        None => StalenessReason::default(),
    };
    let request = MarkRequest {
        root_ref: body.root_ref,
        reason_code,
        reason_detail: body.reason_detail,
        max_depth: body.max_depth,
    };

    let outcome = state.ledger.staleness().mark(&actor, request).await?;
    let status = if outcome.dependents_marked.iter().any(|d| d.newly_marked) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct StaleDependentsQuery {
    pub root_kind: String,
    pub root_id: String,
}

#[derive(Debug, Serialize)]
pub struct StaleDependentsResponse {
    pub root_kind: String,
    pub root_id: String,
    pub dependents: Vec<StaleMarker>,
}

/// Unresolved markers under a root, most recent first.
pub async fn list_stale_dependents(
    State(state): State<AppState>,
    query: Result<Query<StaleDependentsQuery>, QueryRejection>,
) -> ApiResult<Json<StaleDependentsResponse>> {
    let Query(query) = query?;
    let root = EntityRef::new(query.root_kind, query.root_id);
    root.validate("root")?;
    let dependents = state.ledger.staleness().dependents(&root).await?;
    Ok(Json(StaleDependentsResponse {
        root_kind: root.kind,
        root_id: root.id,
        dependents,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BlockingQuery {
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct BlockingResponse {
    pub kind: String,
    pub id: String,
    pub blocked: bool,
    pub markers: Vec<StaleMarker>,
}

/// Whether an entity is blocked by unresolved staleness.
pub async fn staleness_blocking(
    State(state): State<AppState>,
    query: Result<Query<BlockingQuery>, QueryRejection>,
) -> ApiResult<Json<BlockingResponse>> {
    let Query(query) = query?;
    let entity = EntityRef::new(query.kind, query.id);
    entity.validate("entity")?;
    let markers = state.ledger.staleness().blocking(&entity).await?;
    Ok(Json(BlockingResponse {
        kind: entity.kind,
        id: entity.id,
        blocked: !markers.is_empty(),
        markers,
    }))
}

pub async fn get_stale_marker(
    State(state): State<AppState>,
    Path(stale_id): Path<String>,
) -> ApiResult<Json<StaleMarker>> {
    Ok(Json(state.ledger.staleness().marker(&stale_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResolveStalenessRequest {
    pub resolution_kind: String,
    #[serde(default)]
    pub resolution_note: Option<String>,
    #[serde(default)]
    pub resolution_refs: Vec<RefRequest>,
}

pub async fn resolve_staleness(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Path(stale_id): Path<String>,
    body: Result<Json<ResolveStalenessRequest>, JsonRejection>,
) -> ApiResult<Json<ResolveOutcome>> {
    let Json(body) = body?;
    let request = ResolveRequest {
        resolution_kind: body.resolution_kind.parse::<ResolutionKind>()?,
        resolution_note: body.resolution_note,
        resolution_refs: typed_refs(body.resolution_refs),
    };
    let outcome = state
        .ledger
        .staleness()
        .resolve(&actor, &stale_id, request)
        .await?;
    Ok(Json(outcome))
}
