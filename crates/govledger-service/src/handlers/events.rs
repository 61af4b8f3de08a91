//! Event log handlers

use crate::auth::Authenticated;
use crate::error::{ApiError, ApiResult};
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
    ActorKind, DomainAppend, EventEnvelope, EventFilter, EventPage, EventStore, ExpectedVersion,
    NewEvent, StreamKind, TypedRef,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
pub struct GetEventsQuery {
    pub stream_kind: Option<String>,
    pub actor_kind: Option<String>,
    pub event_type: Option<String>,
    pub stream_id: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<u64>,
    /// `desc` (default) or `asc`.
    pub order: Option<String>,
}

impl GetEventsQuery {
    fn into_filter(self) -> ApiResult<EventFilter> {
        let descending = match self.order.as_deref() {
            None | Some("desc") => true,
            Some("asc") => false,
            Some(other) => {
                return Err(ApiError::Validation(format!(
                    "order must be 'asc' or 'desc', got '{}'",
                    other
                )))
            }
        };
        Ok(EventFilter {
            stream_kind: self
                .stream_kind
                .as_deref()
                .map(str::parse::<StreamKind>)
                .transpose()?,
            actor_kind: self
                .actor_kind
                .as_deref()
                .map(str::parse::<ActorKind>)
                .transpose()?,
            event_type: self.event_type,
            stream_id: self.stream_id,
            limit: self.limit,
            cursor: self.cursor,
            descending,
        })
    }
}

/// List events, newest first unless `order=asc`.
pub async fn list_events(
    State(state): State<AppState>,
    query: Result<Query<GetEventsQuery>, QueryRejection>,
) -> ApiResult<Json<EventPage>> {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    Ok(Json(state.ledger.store().query(&filter).await?))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<EventEnvelope>> {
    state
        .ledger
        .store()
        .get(&event_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Event '{}' not found", event_id)))
}

#[derive(Debug, Deserialize)]
pub struct AppendEventRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    pub stream_id: String,
    pub stream_kind: String,
    pub event_type: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub supersedes: Vec<String>,
    #[serde(default)]
    pub refs: Vec<TypedRef>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Number of events the stream must already hold.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

/// Append a domain event as the authenticated actor.
pub async fn append_event(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    body: Result<Json<AppendEventRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DomainAppend>)> {
    let Json(body) = body?;
    let stream_kind: StreamKind = body.stream_kind.parse()?;

    let mut event = NewEvent::new(body.stream_id, stream_kind, body.event_type, actor.clone())
        .with_refs(body.refs)
        .with_correlation(body.correlation_id)
        .with_causation(body.causation_id)
        .superseding(body.supersedes);
    if let Some(event_id) = body.event_id {
        event = event.with_event_id(event_id);
    }
    if let Some(payload) = body.payload {
        event = event.with_payload(payload);
    }
    let expected = body
        .expected_version
        .map_or(ExpectedVersion::Any, ExpectedVersion::Exact);

    let appended = state.ledger.append_event(&actor, event, expected).await?;
    let status = if appended.receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(appended)))
}
