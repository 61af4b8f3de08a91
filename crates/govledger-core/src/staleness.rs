//! Staleness markers: creation by graph traversal, lookup, and resolution.
//!
//! Marker state is never stored outside the ledger. `NodeMarkedStale` and
//! `StalenessResolved` events are folded into an index on demand.

use crate::actor::{authorize, Actor, Operation};
use crate::error::{LedgerError, LedgerResult};
use crate::graph::{validate_depth, Dependent, GraphProjection};
use crate::store::EventStore;
use crate::types::{
    entity, event_types, new_id, rel, EntityRef, EventEnvelope, ExpectedVersion, NewEvent,
    StreamKind, TypedRef,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_MAX_DEPTH_LIMIT: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StalenessReason {
    GovernedArtifactChanged,
    OracleSuiteRebased,
    ExceptionActivated,
    DependencyStale,
    ManualMark,
}

impl StalenessReason {
    pub const ALL: [StalenessReason; 5] = [
        StalenessReason::GovernedArtifactChanged,
        StalenessReason::OracleSuiteRebased,
        StalenessReason::ExceptionActivated,
        StalenessReason::DependencyStale,
        StalenessReason::ManualMark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GovernedArtifactChanged => "GOVERNED_ARTIFACT_CHANGED",
            Self::OracleSuiteRebased => "ORACLE_SUITE_REBASED",
            Self::ExceptionActivated => "EXCEPTION_ACTIVATED",
            Self::DependencyStale => "DEPENDENCY_STALE",
            Self::ManualMark => "MANUAL_MARK",
        }
    }
}

impl Default for StalenessReason {
    fn default() -> Self {
        Self::ManualMark
    }
}

impl fmt::Display for StalenessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StalenessReason {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str() == value)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "invalid reason_code '{}'; expected one of: GOVERNED_ARTIFACT_CHANGED, ORACLE_SUITE_REBASED, EXCEPTION_ACTIVATED, DEPENDENCY_STALE, MANUAL_MARK",
                    value
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionKind {
    /// System-issued, automatic.
    Mechanical,
    /// Human-authorized, backed by a Decision or Approval.
    Decision,
}

impl ResolutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mechanical => "MECHANICAL",
            Self::Decision => "DECISION",
        }
    }
}

impl FromStr for ResolutionKind {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "MECHANICAL" => Ok(Self::Mechanical),
            "DECISION" => Ok(Self::Decision),
            _ => Err(LedgerError::Validation(format!(
                "resolution_kind must be MECHANICAL or DECISION, got '{}'",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkerStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleMarker {
    pub stale_id: String,
    pub root_ref: EntityRef,
    pub dependent_ref: EntityRef,
    pub reason_code: StalenessReason,
    pub reason_detail: Option<String>,
    pub depth: u32,
    pub marked_at: DateTime<Utc>,
    pub marked_by: Actor,
    pub mark_event_id: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_kind: Option<ResolutionKind>,
    pub resolution_note: Option<String>,
    pub resolution_refs: Vec<TypedRef>,
    pub resolved_by: Option<Actor>,
    pub resolution_event_id: Option<String>,
    #[serde(skip)]
    marked_seq: u64,
}

impl StaleMarker {
    pub fn status(&self) -> MarkerStatus {
        if self.resolved_at.is_some() {
            MarkerStatus::Resolved
        } else {
            MarkerStatus::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == MarkerStatus::Active
    }
}

type MarkerKey = (EntityRef, EntityRef, StalenessReason);

#[derive(Debug, Deserialize)]
struct MarkedPayload {
    stale_id: String,
    root_kind: String,
    root_id: String,
    dependent_kind: String,
    dependent_id: String,
    reason_code: StalenessReason,
    #[serde(default)]
    reason_detail: Option<String>,
    #[serde(default)]
    depth: u32,
}

#[derive(Debug, Deserialize)]
struct ResolvedPayload {
    stale_id: String,
    resolution_kind: ResolutionKind,
    #[serde(default)]
    resolution_note: Option<String>,
    #[serde(default)]
    resolution_refs: Vec<TypedRef>,
}

/// Marker state folded from the ledger.
#[derive(Debug, Default)]
struct MarkerIndex {
    markers: HashMap<String, StaleMarker>,
    active_by_key: HashMap<MarkerKey, String>,
    applied_through: u64,
}

impl MarkerIndex {
    fn apply(&mut self, event: &EventEnvelope) -> LedgerResult<()> {
        if event.global_seq <= self.applied_through {
            return Ok(());
        }
        match event.event_type.as_str() {
            event_types::NODE_MARKED_STALE => {
                let payload: MarkedPayload = serde_json::from_value(event.payload.clone())?;
                let marker = StaleMarker {
                    stale_id: payload.stale_id.clone(),
                    root_ref: EntityRef::new(payload.root_kind, payload.root_id),
                    dependent_ref: EntityRef::new(payload.dependent_kind, payload.dependent_id),
                    reason_code: payload.reason_code,
                    reason_detail: payload.reason_detail,
                    depth: payload.depth,
                    marked_at: event.occurred_at,
                    marked_by: event.actor(),
                    mark_event_id: event.event_id.clone(),
                    resolved_at: None,
                    resolution_kind: None,
                    resolution_note: None,
                    resolution_refs: Vec::new(),
                    resolved_by: None,
                    resolution_event_id: None,
                    marked_seq: event.global_seq,
                };
                self.active_by_key.insert(
                    (
                        marker.root_ref.clone(),
                        marker.dependent_ref.clone(),
                        marker.reason_code,
                    ),
                    marker.stale_id.clone(),
                );
                self.markers.insert(payload.stale_id, marker);
            }
            event_types::STALENESS_RESOLVED => {
                let payload: ResolvedPayload = serde_json::from_value(event.payload.clone())?;
                if let Some(marker) = self.markers.get_mut(&payload.stale_id) {
                    if marker.resolved_at.is_none() {
                        marker.resolved_at = Some(event.occurred_at);
                        marker.resolution_kind = Some(payload.resolution_kind);
                        marker.resolution_note = payload.resolution_note;
                        marker.resolution_refs = payload.resolution_refs;
                        marker.resolved_by = Some(event.actor());
                        marker.resolution_event_id = Some(event.event_id.clone());
                        let key = (
                            marker.root_ref.clone(),
                            marker.dependent_ref.clone(),
                            marker.reason_code,
                        );
                        if self.active_by_key.get(&key) == Some(&marker.stale_id) {
                            self.active_by_key.remove(&key);
                        }
                    }
                }
            }
            _ => {}
        }
        self.applied_through = event.global_seq;
        Ok(())
    }

    fn active_for(&self, key: &MarkerKey) -> Option<&StaleMarker> {
        self.active_by_key
            .get(key)
            .and_then(|stale_id| self.markers.get(stale_id))
    }

    fn sorted_recent_first<'a>(
        &'a self,
        predicate: impl Fn(&StaleMarker) -> bool,
    ) -> Vec<StaleMarker> {
        let mut found: Vec<&'a StaleMarker> =
            self.markers.values().filter(|m| predicate(m)).collect();
        found.sort_by(|a, b| b.marked_seq.cmp(&a.marked_seq));
        found.into_iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalenessConfig {
    #[serde(default = "default_max_depth")]
    pub default_max_depth: u32,
    #[serde(default = "default_max_depth_limit")]
    pub max_depth_limit: u32,
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_max_depth_limit() -> u32 {
    DEFAULT_MAX_DEPTH_LIMIT
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            default_max_depth: DEFAULT_MAX_DEPTH,
            max_depth_limit: DEFAULT_MAX_DEPTH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkRequest {
    pub root_ref: EntityRef,
    #[serde(default)]
    pub reason_code: StalenessReason,
    #[serde(default)]
    pub reason_detail: Option<String>,
    #[serde(default)]
    pub max_depth: Option<u32>,
}

impl MarkRequest {
    pub fn new(root_ref: EntityRef, reason_code: StalenessReason) -> Self {
        Self {
            root_ref,
            reason_code,
            reason_detail: None,
            max_depth: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.reason_detail = Some(detail.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkedDependent {
    pub stale_id: String,
    pub dependent: EntityRef,
    pub depth: u32,
    /// False when an unresolved marker with the same key already existed.
    pub newly_marked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkOutcome {
    pub root_ref: EntityRef,
    pub reason_code: StalenessReason,
    pub stale_ids: Vec<String>,
    pub dependents_marked: Vec<MarkedDependent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub resolution_kind: ResolutionKind,
    #[serde(default)]
    pub resolution_note: Option<String>,
    #[serde(default)]
    pub resolution_refs: Vec<TypedRef>,
}

impl ResolveRequest {
    pub fn mechanical() -> Self {
        Self {
            resolution_kind: ResolutionKind::Mechanical,
            resolution_note: None,
            resolution_refs: Vec::new(),
        }
    }

    pub fn decision(refs: Vec<TypedRef>) -> Self {
        Self {
            resolution_kind: ResolutionKind::Decision,
            resolution_note: None,
            resolution_refs: refs,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.resolution_note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub stale_id: String,
    pub resolved: bool,
    pub event_id: String,
}

/// Upstream changes that mark their dependents stale automatically.
pub fn propagation_trigger(event: &EventEnvelope) -> Option<(EntityRef, StalenessReason)> {
    match event.event_type.as_str() {
        event_types::GOVERNED_ARTIFACT_VERSION_RECORDED => {
            let id = event.payload_str("artifact_id").unwrap_or(&event.stream_id);
            Some((
                EntityRef::new(entity::GOVERNED_ARTIFACT, id),
                StalenessReason::GovernedArtifactChanged,
            ))
        }
        event_types::ORACLE_SUITE_REBASED => {
            let id = event
                .payload_str("oracle_suite_id")
                .unwrap_or(&event.stream_id);
            Some((
                EntityRef::new(entity::ORACLE_SUITE, id),
                StalenessReason::OracleSuiteRebased,
            ))
        }
        event_types::EXCEPTION_ACTIVATED => Some((
            EntityRef::new(entity::EXCEPTION, event.stream_id.clone()),
            StalenessReason::ExceptionActivated,
        )),
        _ => None,
    }
}

pub struct StalenessEngine {
    store: Arc<dyn EventStore>,
    graph: Arc<GraphProjection>,
    config: StalenessConfig,
    index: RwLock<MarkerIndex>,
    // Serializes check-then-append so concurrent marks cannot duplicate a key.
    mark_lock: Mutex<()>,
}

impl StalenessEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        graph: Arc<GraphProjection>,
        config: StalenessConfig,
    ) -> Self {
        Self {
            store,
            graph,
            config,
            index: RwLock::new(MarkerIndex::default()),
            mark_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StalenessConfig {
        &self.config
    }

    async fn refresh(&self) -> LedgerResult<()> {
        let mut index = self.index.write().await;
        let pending = self.store.events_since(index.applied_through).await?;
        for event in &pending {
            index.apply(event)?;
        }
        Ok(())
    }

    /// Mark every dependent of `root_ref` stale.
    ///
    /// Dependents that already hold an unresolved marker for the same
    /// `(root, dependent, reason)` keep it; their existing `stale_id` is
    /// returned and nothing is appended for them. A root nothing depends on
    /// is marked itself, at depth 0.
    pub async fn mark(&self, actor: &Actor, request: MarkRequest) -> LedgerResult<MarkOutcome> {
        self.mark_targets(actor, request, true).await
    }

    async fn mark_targets(
        &self,
        actor: &Actor,
        request: MarkRequest,
        mark_leaf_root: bool,
    ) -> LedgerResult<MarkOutcome> {
        authorize(actor, Operation::MarkStale)?;
        request.root_ref.validate("root_ref")?;
        let max_depth = request.max_depth.unwrap_or(self.config.default_max_depth);
        validate_depth(max_depth, self.config.max_depth_limit)?;

        let _guard = self.mark_lock.lock().await;
        let mut dependents = self.graph.dependents_of(&request.root_ref, max_depth).await?;
        if dependents.is_empty() && mark_leaf_root {
            dependents.push(Dependent {
                entity: request.root_ref.clone(),
                depth: 0,
                via: request.root_ref.clone(),
            });
        }
        self.refresh().await?;

        let mut outcome = MarkOutcome {
            root_ref: request.root_ref.clone(),
            reason_code: request.reason_code,
            stale_ids: Vec::with_capacity(dependents.len()),
            dependents_marked: Vec::with_capacity(dependents.len()),
        };

        for dependent in dependents {
            let key = (
                request.root_ref.clone(),
                dependent.entity.clone(),
                request.reason_code,
            );
            let existing = self
                .index
                .read()
                .await
                .active_for(&key)
                .map(|m| m.stale_id.clone());

            let (stale_id, newly_marked) = match existing {
                Some(stale_id) => (stale_id, false),
                None => {
                    let stale_id = self
                        .append_marker(actor, &request, &dependent.entity, dependent.depth)
                        .await?;
                    (stale_id, true)
                }
            };

            outcome.stale_ids.push(stale_id.clone());
            outcome.dependents_marked.push(MarkedDependent {
                stale_id,
                dependent: dependent.entity,
                depth: dependent.depth,
                newly_marked,
            });
        }

        info!(
            root = %request.root_ref,
            reason = request.reason_code.as_str(),
            max_depth,
            marked = outcome.dependents_marked.len(),
            "staleness marked"
        );
        Ok(outcome)
    }

    async fn append_marker(
        &self,
        actor: &Actor,
        request: &MarkRequest,
        dependent: &EntityRef,
        depth: u32,
    ) -> LedgerResult<String> {
        let stale_id = new_id("stale");
        let event = NewEvent::new(
            stale_id.clone(),
            StreamKind::Governance,
            event_types::NODE_MARKED_STALE,
            actor.clone(),
        )
        .with_refs(vec![
            request.root_ref.with_rel(rel::ROOT_CAUSE),
            dependent
                .with_rel(rel::STALE)
                .with_meta(serde_json::json!({ "reason_code": request.reason_code })),
        ])
        .with_payload(serde_json::json!({
            "stale_id": stale_id,
            "root_kind": request.root_ref.kind,
            "root_id": request.root_ref.id,
            "dependent_kind": dependent.kind,
            "dependent_id": dependent.id,
            "reason_code": request.reason_code,
            "reason_detail": request.reason_detail,
            "depth": depth,
        }));

        self.store.append(event, ExpectedVersion::Exact(0)).await?;
        self.refresh().await?;
        debug!(stale_id = %stale_id, dependent = %dependent, "marker created");
        Ok(stale_id)
    }

    /// Unresolved markers rooted at `root_ref`, most recent first.
    pub async fn dependents(&self, root_ref: &EntityRef) -> LedgerResult<Vec<StaleMarker>> {
        self.refresh().await?;
        Ok(self
            .index
            .read()
            .await
            .sorted_recent_first(|m| m.is_active() && &m.root_ref == root_ref))
    }

    /// Unresolved markers naming `dependent` as stale, most recent first.
    pub async fn blocking(&self, dependent: &EntityRef) -> LedgerResult<Vec<StaleMarker>> {
        self.refresh().await?;
        Ok(self
            .index
            .read()
            .await
            .sorted_recent_first(|m| m.is_active() && &m.dependent_ref == dependent))
    }

    pub async fn is_blocked(&self, dependent: &EntityRef) -> LedgerResult<bool> {
        Ok(!self.blocking(dependent).await?.is_empty())
    }

    pub async fn marker(&self, stale_id: &str) -> LedgerResult<StaleMarker> {
        self.refresh().await?;
        self.index
            .read()
            .await
            .markers
            .get(stale_id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("StaleMarker", stale_id))
    }

    /// Close a marker. A marker is resolved at most once.
    pub async fn resolve(
        &self,
        actor: &Actor,
        stale_id: &str,
        request: ResolveRequest,
    ) -> LedgerResult<ResolveOutcome> {
        match request.resolution_kind {
            ResolutionKind::Mechanical => authorize(actor, Operation::ResolveStaleMechanical)?,
            ResolutionKind::Decision => {
                authorize(actor, Operation::ResolveStaleDecision)?;
                self.validate_decision_refs(&request.resolution_refs).await?;
            }
        }
        for typed_ref in &request.resolution_refs {
            typed_ref.validate()?;
        }

        // Shares the mark lock so a concurrent mark never reuses a marker
        // that is being closed.
        let _guard = self.mark_lock.lock().await;
        let marker = self.marker(stale_id).await?;
        if !marker.is_active() {
            return Err(already_resolved(stale_id));
        }
        let version = self.store.read_stream(stale_id).await?.len() as u64;

        let mut refs = vec![
            marker.root_ref.with_rel(rel::ROOT_CAUSE),
            marker.dependent_ref.with_rel(rel::STALE),
        ];
        refs.extend(request.resolution_refs.iter().cloned());

        let event = NewEvent::new(
            stale_id,
            StreamKind::Governance,
            event_types::STALENESS_RESOLVED,
            actor.clone(),
        )
        .with_refs(refs)
        .with_causation(Some(marker.mark_event_id.clone()))
        .with_payload(serde_json::json!({
            "stale_id": stale_id,
            "resolution_kind": request.resolution_kind,
            "resolution_note": request.resolution_note,
            "resolution_refs": request.resolution_refs,
        }));

        let receipt = match self.store.append(event, ExpectedVersion::Exact(version)).await {
            Ok(receipt) => receipt,
            Err(LedgerError::Conflict(detail)) => {
                // Another writer got to the stream first; report what it did.
                return Err(if self.marker(stale_id).await?.is_active() {
                    LedgerError::Conflict(detail)
                } else {
                    already_resolved(stale_id)
                });
            }
            Err(other) => return Err(other),
        };
        self.refresh().await?;

        info!(
            stale_id,
            resolution_kind = request.resolution_kind.as_str(),
            actor = %actor,
            "staleness resolved"
        );
        Ok(ResolveOutcome {
            stale_id: stale_id.to_string(),
            resolved: true,
            event_id: receipt.event_id,
        })
    }

    async fn validate_decision_refs(&self, refs: &[TypedRef]) -> LedgerResult<()> {
        let binding: Vec<&TypedRef> = refs
            .iter()
            .filter(|r| r.kind == entity::DECISION || r.kind == entity::APPROVAL)
            .collect();
        if binding.is_empty() {
            return Err(LedgerError::Validation(
                "DECISION resolution requires at least one Decision or Approval ref".to_string(),
            ));
        }
        for typed_ref in binding {
            let (expected_kind, expected_type) = if typed_ref.kind == entity::DECISION {
                (StreamKind::Decision, event_types::DECISION_RECORDED)
            } else {
                (StreamKind::Approval, event_types::APPROVAL_RECORDED)
            };
            let stream = self.store.read_stream(&typed_ref.id).await?;
            let recorded = stream.first().map_or(false, |e| {
                e.stream_kind == expected_kind && e.event_type == expected_type
            });
            if !recorded {
                return Err(LedgerError::Validation(format!(
                    "resolution ref {}:{} does not name a recorded {}",
                    typed_ref.kind, typed_ref.id, typed_ref.kind
                )));
            }
        }
        Ok(())
    }

    /// Mark dependents of the entity an upstream event changed, acting as `actor`.
    pub async fn propagate(
        &self,
        actor: &Actor,
        event: &EventEnvelope,
    ) -> LedgerResult<Option<MarkOutcome>> {
        let Some((root_ref, reason)) = propagation_trigger(event) else {
            return Ok(None);
        };
        let request = MarkRequest::new(root_ref, reason)
            .with_detail(format!("{} ({})", event.event_type, event.event_id));
        self.mark_targets(actor, request, false).await.map(Some)
    }
}

impl fmt::Debug for StalenessEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StalenessEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn already_resolved(stale_id: &str) -> LedgerError {
    LedgerError::Conflict(format!("stale marker '{}' is already resolved", stale_id))
}
