//! Binding governance records: approvals, exceptions and decisions.
//!
//! Records are created only by HUMAN actors and live in their own streams
//! (`appr_*`, `exc_*`, `dec_*`). Reads fold those streams; nothing about a
//! record is held outside the ledger.

use crate::actor::{authorize, Actor, Operation};
use crate::error::{LedgerError, LedgerResult};
use crate::integrity::{IntegrityCondition, IntegrityRegistry};
use crate::portal::validate_portal;
use crate::store::{scan, EventStore};
use crate::types::{
    entity, event_types, new_id, rel, EventEnvelope, EventFilter, ExpectedVersion, NewEvent,
    StreamKind, TypedRef, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

macro_rules! wire_enum {
    ($name:ident, $label:literal, { $($variant:ident => $code:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.to_ascii_uppercase().as_str() {
                    $($code => Ok(Self::$variant),)+
                    _ => Err(LedgerError::Validation(format!(
                        "invalid {} '{}'; expected one of: {}",
                        $label,
                        value,
                        [$($code),+].join(", ")
                    ))),
                }
            }
        }
    };
}

wire_enum!(ApprovalDecision, "decision", {
    Approved => "APPROVED",
    Rejected => "REJECTED",
    Deferred => "DEFERRED",
});

wire_enum!(ExceptionKind, "exception kind", {
    Deviation => "DEVIATION",
    Deferral => "DEFERRAL",
    Waiver => "WAIVER",
});

wire_enum!(ExceptionStatus, "exception status", {
    Created => "CREATED",
    Active => "ACTIVE",
    Resolved => "RESOLVED",
    Expired => "EXPIRED",
});

impl Default for ExceptionStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl ExceptionKind {
    pub fn created_event_type(&self) -> &'static str {
        match self {
            Self::Deviation => event_types::DEVIATION_CREATED,
            Self::Deferral => event_types::DEFERRAL_CREATED,
            Self::Waiver => event_types::WAIVER_CREATED,
        }
    }

    fn from_created_event(event_type: &str) -> Option<Self> {
        match event_type {
            event_types::DEVIATION_CREATED => Some(Self::Deviation),
            event_types::DEFERRAL_CREATED => Some(Self::Deferral),
            event_types::WAIVER_CREATED => Some(Self::Waiver),
            _ => None,
        }
    }
}

/// Status an exception presents at `now`.
///
/// Expiry is never recorded: an ACTIVE exception whose `expires_at` has
/// passed reads as EXPIRED. Every read and transition goes through here.
pub fn effective_status(
    status: ExceptionStatus,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ExceptionStatus {
    match (status, expires_at) {
        (ExceptionStatus::Active, Some(expires_at)) if expires_at <= now => {
            ExceptionStatus::Expired
        }
        _ => status,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordApproval {
    pub portal_id: String,
    pub decision: String,
    #[serde(default)]
    pub subject_refs: Vec<TypedRef>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub exceptions_acknowledged: Vec<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_id: Option<String>,
    #[serde(default)]
    pub artifact_refs: Vec<TypedRef>,
}

impl ExceptionScope {
    fn is_empty(&self) -> bool {
        self.loop_id.is_none()
            && self.candidate_id.is_none()
            && self.oracle_id.is_none()
            && self.artifact_refs.is_empty()
    }

    fn refs(&self) -> Vec<TypedRef> {
        let mut refs = Vec::new();
        if let Some(loop_id) = &self.loop_id {
            refs.push(TypedRef::new(entity::LOOP, loop_id.clone(), rel::IN_SCOPE_OF));
        }
        if let Some(candidate_id) = &self.candidate_id {
            refs.push(TypedRef::new(
                entity::CANDIDATE,
                candidate_id.clone(),
                rel::IN_SCOPE_OF,
            ));
        }
        if let Some(oracle_id) = &self.oracle_id {
            refs.push(TypedRef::new("Oracle", oracle_id.clone(), rel::IN_SCOPE_OF));
        }
        refs.extend(self.artifact_refs.iter().cloned());
        refs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateException {
    pub kind: String,
    pub scope: ExceptionScope,
    pub rationale: String,
    #[serde(default)]
    pub target_description: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolveException {
    #[serde(default)]
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDecision {
    pub trigger: String,
    #[serde(default)]
    pub scope: Value,
    pub decision: String,
    pub rationale: String,
    #[serde(default)]
    pub subject_refs: Vec<TypedRef>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub exceptions_acknowledged: Vec<String>,
    #[serde(default)]
    pub is_precedent: bool,
    #[serde(default)]
    pub applicability: Option<String>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approval_id: String,
    pub portal_id: String,
    pub decision: ApprovalDecision,
    pub subject_refs: Vec<TypedRef>,
    pub evidence_refs: Vec<String>,
    pub exceptions_acknowledged: Vec<String>,
    pub rationale: Option<String>,
    pub approved_by: Actor,
    pub approved_at: DateTime<Utc>,
    pub event_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    pub exception_id: String,
    pub kind: ExceptionKind,
    /// Effective status at read time.
    pub status: ExceptionStatus,
    pub scope: ExceptionScope,
    pub rationale: String,
    pub target_description: String,
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: Option<Actor>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Actor>,
    pub resolution_notes: Option<String>,
    pub event_id: String,
    #[serde(skip)]
    recorded_status: ExceptionStatus,
    #[serde(skip)]
    version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub trigger: String,
    pub scope: Value,
    pub decision: String,
    pub rationale: String,
    pub subject_refs: Vec<TypedRef>,
    pub evidence_refs: Vec<String>,
    pub exceptions_acknowledged: Vec<String>,
    pub is_precedent: bool,
    pub applicability: Option<String>,
    pub decided_by: Actor,
    pub decided_at: DateTime<Utc>,
    pub event_id: String,
}

/// Result of an exception lifecycle command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionTransition {
    pub exception_id: String,
    pub kind: ExceptionKind,
    pub status: ExceptionStatus,
    pub event_id: String,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalFilter {
    #[serde(default)]
    pub portal_id: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionFilter {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionFilter {
    #[serde(default)]
    pub is_precedent: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Records ordered most recent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage<T> {
    pub records: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

fn paginate<T>(mut records: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> RecordPage<T> {
    let limit = limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT);
    let offset = offset.unwrap_or(0);
    let total = records.len();
    records.reverse();
    let records = records.into_iter().skip(offset).take(limit).collect();
    RecordPage {
        records,
        total,
        limit,
        offset,
    }
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct ApprovalPayload {
    approval_id: String,
    portal_id: String,
    decision: ApprovalDecision,
    #[serde(default)]
    subject_refs: Vec<TypedRef>,
    #[serde(default)]
    evidence_refs: Vec<String>,
    #[serde(default)]
    exceptions_acknowledged: Vec<String>,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExceptionCreatedPayload {
    exception_id: String,
    kind: ExceptionKind,
    scope: ExceptionScope,
    rationale: String,
    #[serde(default)]
    target_description: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DecisionPayload {
    decision_id: String,
    trigger: String,
    #[serde(default)]
    scope: Value,
    decision: String,
    rationale: String,
    #[serde(default)]
    subject_refs: Vec<TypedRef>,
    #[serde(default)]
    evidence_refs: Vec<String>,
    #[serde(default)]
    exceptions_acknowledged: Vec<String>,
    #[serde(default)]
    is_precedent: bool,
    #[serde(default)]
    applicability: Option<String>,
}

fn approval_from_event(event: &EventEnvelope) -> LedgerResult<Approval> {
    let payload: ApprovalPayload = serde_json::from_value(event.payload.clone())?;
    Ok(Approval {
        approval_id: payload.approval_id,
        portal_id: payload.portal_id,
        decision: payload.decision,
        subject_refs: payload.subject_refs,
        evidence_refs: payload.evidence_refs,
        exceptions_acknowledged: payload.exceptions_acknowledged,
        rationale: payload.rationale,
        approved_by: event.actor(),
        approved_at: event.occurred_at,
        event_id: event.event_id.clone(),
    })
}

fn decision_from_event(event: &EventEnvelope) -> LedgerResult<Decision> {
    let payload: DecisionPayload = serde_json::from_value(event.payload.clone())?;
    Ok(Decision {
        decision_id: payload.decision_id,
        trigger: payload.trigger,
        scope: payload.scope,
        decision: payload.decision,
        rationale: payload.rationale,
        subject_refs: payload.subject_refs,
        evidence_refs: payload.evidence_refs,
        exceptions_acknowledged: payload.exceptions_acknowledged,
        is_precedent: payload.is_precedent,
        applicability: payload.applicability,
        decided_by: event.actor(),
        decided_at: event.occurred_at,
        event_id: event.event_id.clone(),
    })
}

/// Fold one exception stream. Returns `None` when the stream is not an exception.
fn fold_exception(stream: &[EventEnvelope], now: DateTime<Utc>) -> LedgerResult<Option<Exception>> {
    let Some(created) = stream.first() else {
        return Ok(None);
    };
    if created.stream_kind != StreamKind::Exception
        || ExceptionKind::from_created_event(&created.event_type).is_none()
    {
        return Ok(None);
    }
    let payload: ExceptionCreatedPayload = serde_json::from_value(created.payload.clone())?;
    let mut exception = Exception {
        exception_id: payload.exception_id,
        kind: payload.kind,
        status: ExceptionStatus::Created,
        scope: payload.scope,
        rationale: payload.rationale,
        target_description: payload.target_description,
        created_by: created.actor(),
        created_at: created.occurred_at,
        expires_at: payload.expires_at,
        activated_at: None,
        activated_by: None,
        resolved_at: None,
        resolved_by: None,
        resolution_notes: None,
        event_id: created.event_id.clone(),
        recorded_status: ExceptionStatus::Created,
        version: 1,
    };

    for event in &stream[1..] {
        match event.event_type.as_str() {
            event_types::EXCEPTION_ACTIVATED => {
                exception.recorded_status = ExceptionStatus::Active;
                exception.activated_at = Some(event.occurred_at);
                exception.activated_by = Some(event.actor());
            }
            event_types::EXCEPTION_RESOLVED => {
                exception.recorded_status = ExceptionStatus::Resolved;
                exception.resolved_at = Some(event.occurred_at);
                exception.resolved_by = Some(event.actor());
                exception.resolution_notes = event.payload_str("resolution_notes").map(str::to_string);
            }
            _ => {}
        }
        exception.version = event.stream_seq;
    }

    exception.status = effective_status(exception.recorded_status, exception.expires_at, now);
    Ok(Some(exception))
}

fn require_text(field: &str, value: &str) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_refs(refs: &[TypedRef]) -> LedgerResult<()> {
    refs.iter().try_for_each(TypedRef::validate)
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Validates and emits Approval, Exception and Decision records.
pub struct GovernanceService {
    store: Arc<dyn EventStore>,
    integrity: IntegrityRegistry,
}

impl GovernanceService {
    pub fn new(store: Arc<dyn EventStore>, integrity: IntegrityRegistry) -> Self {
        Self { store, integrity }
    }

    pub fn integrity(&self) -> &IntegrityRegistry {
        &self.integrity
    }

    async fn validate_acknowledged(&self, exception_ids: &[String]) -> LedgerResult<()> {
        for exception_id in exception_ids {
            let stream = self.store.read_stream(exception_id).await?;
            if fold_exception(&stream, Utc::now())?.is_none() {
                return Err(LedgerError::Validation(format!(
                    "acknowledged exception '{}' does not exist",
                    exception_id
                )));
            }
        }
        Ok(())
    }

    pub async fn record_approval(
        &self,
        actor: &Actor,
        command: RecordApproval,
    ) -> LedgerResult<Approval> {
        authorize(actor, Operation::RecordApproval)?;
        validate_portal(&command.portal_id)?;
        let decision: ApprovalDecision = command.decision.parse()?;
        validate_refs(&command.subject_refs)?;
        self.validate_acknowledged(&command.exceptions_acknowledged)
            .await?;

        let approval_id = new_id("appr");
        let mut refs = command.subject_refs.clone();
        refs.extend(
            command
                .exceptions_acknowledged
                .iter()
                .map(|id| TypedRef::new(entity::EXCEPTION, id.clone(), rel::ACKNOWLEDGES)),
        );

        let payload = ApprovalPayload {
            approval_id: approval_id.clone(),
            portal_id: command.portal_id,
            decision,
            subject_refs: command.subject_refs,
            evidence_refs: command.evidence_refs,
            exceptions_acknowledged: command.exceptions_acknowledged,
            rationale: command.rationale,
        };
        let event = NewEvent::new(
            approval_id.clone(),
            StreamKind::Approval,
            event_types::APPROVAL_RECORDED,
            actor.clone(),
        )
        .with_refs(refs)
        .with_payload(serde_json::to_value(&payload)?);

        let receipt = self.store.append(event, ExpectedVersion::Exact(0)).await?;
        info!(
            approval_id = %approval_id,
            portal_id = %payload.portal_id,
            decision = decision.as_str(),
            actor = %actor,
            "approval recorded"
        );
        self.approval_by_event(&receipt.event_id).await
    }

    async fn approval_by_event(&self, event_id: &str) -> LedgerResult<Approval> {
        let event = self
            .store
            .get(event_id)
            .await?
            .ok_or_else(|| LedgerError::Storage(format!("event '{}' vanished", event_id)))?;
        approval_from_event(&event)
    }

    pub async fn get_approval(&self, approval_id: &str) -> LedgerResult<Approval> {
        let stream = self.store.read_stream(approval_id).await?;
        match stream.first() {
            Some(event) if event.event_type == event_types::APPROVAL_RECORDED => {
                approval_from_event(event)
            }
            _ => Err(LedgerError::not_found("Approval", approval_id)),
        }
    }

    pub async fn list_approvals(&self, filter: &ApprovalFilter) -> LedgerResult<RecordPage<Approval>> {
        let decision = filter
            .decision
            .as_deref()
            .map(str::parse::<ApprovalDecision>)
            .transpose()?;
        let events = scan(
            self.store.as_ref(),
            EventFilter::event_type(event_types::APPROVAL_RECORDED),
        )
        .await?;

        let mut approvals = Vec::with_capacity(events.len());
        for event in &events {
            let approval = approval_from_event(event)?;
            if filter
                .portal_id
                .as_deref()
                .map_or(true, |p| approval.portal_id == p)
                && decision.map_or(true, |d| approval.decision == d)
            {
                approvals.push(approval);
            }
        }
        Ok(paginate(approvals, filter.limit, filter.offset))
    }

    pub async fn create_exception(
        &self,
        actor: &Actor,
        command: CreateException,
    ) -> LedgerResult<Exception> {
        authorize(actor, Operation::CreateException)?;
        let kind: ExceptionKind = command.kind.parse()?;
        require_text("rationale", &command.rationale)?;
        if command.scope.is_empty() {
            return Err(LedgerError::Validation(
                "scope must name a loop, candidate, oracle or artifact".to_string(),
            ));
        }
        validate_refs(&command.scope.artifact_refs)?;
        if let Some(expires_at) = command.expires_at {
            if expires_at <= Utc::now() {
                return Err(LedgerError::Validation(
                    "expires_at must be in the future".to_string(),
                ));
            }
        }
        if kind == ExceptionKind::Waiver {
            self.reject_integrity_waiver(&command).await?;
        }

        let exception_id = new_id("exc");
        let payload = ExceptionCreatedPayload {
            exception_id: exception_id.clone(),
            kind,
            scope: command.scope,
            rationale: command.rationale,
            target_description: command.target_description,
            expires_at: command.expires_at,
        };
        let event = NewEvent::new(
            exception_id.clone(),
            StreamKind::Exception,
            kind.created_event_type(),
            actor.clone(),
        )
        .with_refs(payload.scope.refs())
        .with_payload(serde_json::to_value(&payload)?);

        self.store.append(event, ExpectedVersion::Exact(0)).await?;
        info!(exception_id = %exception_id, kind = kind.as_str(), actor = %actor, "exception created");
        self.get_exception(&exception_id).await
    }

    async fn reject_integrity_waiver(&self, command: &CreateException) -> LedgerResult<()> {
        let mut condition: Option<IntegrityCondition> = None;
        if let Some(oracle_id) = &command.scope.oracle_id {
            condition = self
                .integrity
                .condition_for_oracle(self.store.as_ref(), oracle_id)
                .await?;
        }
        if condition.is_none() {
            condition = IntegrityCondition::find_in(&command.target_description);
        }
        match condition {
            Some(condition) => Err(LedgerError::Validation(format!(
                "integrity condition {} cannot be waived",
                condition
            ))),
            None => Ok(()),
        }
    }

    pub async fn get_exception(&self, exception_id: &str) -> LedgerResult<Exception> {
        self.exception_at(exception_id, Utc::now()).await
    }

    /// Exception as it reads at `now`.
    pub async fn exception_at(
        &self,
        exception_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Exception> {
        let stream = self.store.read_stream(exception_id).await?;
        fold_exception(&stream, now)?.ok_or_else(|| LedgerError::not_found("Exception", exception_id))
    }

    pub async fn list_exceptions(
        &self,
        filter: &ExceptionFilter,
    ) -> LedgerResult<RecordPage<Exception>> {
        let kind = filter
            .kind
            .as_deref()
            .map(str::parse::<ExceptionKind>)
            .transpose()?;
        let status = filter
            .status
            .as_deref()
            .map(str::parse::<ExceptionStatus>)
            .transpose()?;

        let created = scan(
            self.store.as_ref(),
            EventFilter {
                stream_kind: Some(StreamKind::Exception),
                ..Default::default()
            },
        )
        .await?;

        let now = Utc::now();
        let mut exceptions = Vec::new();
        for event in created.iter().filter(|e| e.stream_seq == 1) {
            let stream = self.store.read_stream(&event.stream_id).await?;
            if let Some(exception) = fold_exception(&stream, now)? {
                if kind.map_or(true, |k| exception.kind == k)
                    && status.map_or(true, |s| exception.status == s)
                {
                    exceptions.push(exception);
                }
            }
        }
        Ok(paginate(exceptions, filter.limit, filter.offset))
    }

    /// CREATED → ACTIVE.
    pub async fn activate_exception(
        &self,
        actor: &Actor,
        exception_id: &str,
    ) -> LedgerResult<(ExceptionTransition, EventEnvelope)> {
        authorize(actor, Operation::ActivateException)?;
        let now = Utc::now();
        let exception = self.exception_at(exception_id, now).await?;
        if exception.recorded_status != ExceptionStatus::Created {
            return Err(LedgerError::invalid_transition(
                "exception",
                exception_id,
                exception.status.as_str(),
                "activate",
            ));
        }
        if matches!(exception.expires_at, Some(expires_at) if expires_at <= now) {
            return Err(LedgerError::Validation(format!(
                "exception '{}' expired before activation",
                exception_id
            )));
        }

        let event = NewEvent::new(
            exception_id,
            StreamKind::Exception,
            event_types::EXCEPTION_ACTIVATED,
            actor.clone(),
        )
        .with_refs(vec![TypedRef::new(entity::EXCEPTION, exception_id, rel::ABOUT)])
        .with_causation(Some(exception.event_id.clone()))
        .with_payload(serde_json::json!({ "exception_id": exception_id }));

        let envelope = self.transition(event, exception.version).await?;
        info!(exception_id, actor = %actor, "exception activated");
        Ok((
            ExceptionTransition {
                exception_id: exception_id.to_string(),
                kind: exception.kind,
                status: ExceptionStatus::Active,
                event_id: envelope.event_id.clone(),
            },
            envelope,
        ))
    }

    /// ACTIVE → RESOLVED. An expired exception can no longer be resolved.
    pub async fn resolve_exception(
        &self,
        actor: &Actor,
        exception_id: &str,
        command: ResolveException,
    ) -> LedgerResult<ExceptionTransition> {
        authorize(actor, Operation::ResolveException)?;
        let exception = self.get_exception(exception_id).await?;
        if exception.status != ExceptionStatus::Active {
            return Err(LedgerError::invalid_transition(
                "exception",
                exception_id,
                exception.status.as_str(),
                "resolve",
            ));
        }

        let event = NewEvent::new(
            exception_id,
            StreamKind::Exception,
            event_types::EXCEPTION_RESOLVED,
            actor.clone(),
        )
        .with_refs(vec![TypedRef::new(entity::EXCEPTION, exception_id, rel::ABOUT)])
        .with_payload(serde_json::json!({
            "exception_id": exception_id,
            "resolution_notes": command.resolution_notes,
        }));

        let envelope = self.transition(event, exception.version).await?;
        info!(exception_id, actor = %actor, "exception resolved");
        Ok(ExceptionTransition {
            exception_id: exception_id.to_string(),
            kind: exception.kind,
            status: ExceptionStatus::Resolved,
            event_id: envelope.event_id,
        })
    }

    async fn transition(&self, event: NewEvent, version: u64) -> LedgerResult<EventEnvelope> {
        let receipt = self
            .store
            .append(event, ExpectedVersion::Exact(version))
            .await?;
        self.store
            .get(&receipt.event_id)
            .await?
            .ok_or_else(|| LedgerError::Storage(format!("event '{}' vanished", receipt.event_id)))
    }

    pub async fn record_decision(
        &self,
        actor: &Actor,
        command: RecordDecision,
    ) -> LedgerResult<Decision> {
        authorize(actor, Operation::RecordDecision)?;
        require_text("trigger", &command.trigger)?;
        require_text("decision", &command.decision)?;
        require_text("rationale", &command.rationale)?;
        validate_refs(&command.subject_refs)?;
        self.validate_acknowledged(&command.exceptions_acknowledged)
            .await?;

        let decision_id = new_id("dec");
        let mut refs = command.subject_refs.clone();
        refs.extend(
            command
                .exceptions_acknowledged
                .iter()
                .map(|id| TypedRef::new(entity::EXCEPTION, id.clone(), rel::ACKNOWLEDGES)),
        );

        let payload = DecisionPayload {
            decision_id: decision_id.clone(),
            trigger: command.trigger,
            scope: command.scope,
            decision: command.decision,
            rationale: command.rationale,
            subject_refs: command.subject_refs,
            evidence_refs: command.evidence_refs,
            exceptions_acknowledged: command.exceptions_acknowledged,
            is_precedent: command.is_precedent,
            applicability: command.applicability,
        };
        let event = NewEvent::new(
            decision_id.clone(),
            StreamKind::Decision,
            event_types::DECISION_RECORDED,
            actor.clone(),
        )
        .with_refs(refs)
        .with_payload(serde_json::to_value(&payload)?);

        self.store.append(event, ExpectedVersion::Exact(0)).await?;
        info!(
            decision_id = %decision_id,
            is_precedent = payload.is_precedent,
            actor = %actor,
            "decision recorded"
        );
        self.get_decision(&decision_id).await
    }

    pub async fn get_decision(&self, decision_id: &str) -> LedgerResult<Decision> {
        let stream = self.store.read_stream(decision_id).await?;
        match stream.first() {
            Some(event) if event.event_type == event_types::DECISION_RECORDED => {
                decision_from_event(event)
            }
            _ => Err(LedgerError::not_found("Decision", decision_id)),
        }
    }

    pub async fn list_decisions(&self, filter: &DecisionFilter) -> LedgerResult<RecordPage<Decision>> {
        let events = scan(
            self.store.as_ref(),
            EventFilter::event_type(event_types::DECISION_RECORDED),
        )
        .await?;

        let mut decisions = Vec::with_capacity(events.len());
        for event in &events {
            let decision = decision_from_event(event)?;
            if filter.is_precedent.map_or(true, |p| decision.is_precedent == p) {
                decisions.push(decision);
            }
        }
        Ok(paginate(decisions, filter.limit, filter.offset))
    }
}

impl fmt::Debug for GovernanceService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernanceService")
            .field("integrity", &self.integrity)
            .finish_non_exhaustive()
    }
}
