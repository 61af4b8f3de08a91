use crate::actor::{Actor, ActorKind};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generate a prefixed identifier such as `evt_6f1c...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Id prefixes of streams owned by markers and governance records.
pub const RECORD_ID_PREFIXES: [&str; 5] = ["stale", "appr", "exc", "dec", "integ"];

/// True when `stream_id` carries a marker or record id prefix.
pub fn is_record_stream(stream_id: &str) -> bool {
    RECORD_ID_PREFIXES.iter().any(|prefix| {
        stream_id
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('_'))
    })
}

/// Logical stream families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamKind {
    Loop,
    Iteration,
    Candidate,
    Run,
    Approval,
    Decision,
    Governance,
    Exception,
    Freeze,
}

impl StreamKind {
    pub const ALL: [StreamKind; 9] = [
        StreamKind::Loop,
        StreamKind::Iteration,
        StreamKind::Candidate,
        StreamKind::Run,
        StreamKind::Approval,
        StreamKind::Decision,
        StreamKind::Governance,
        StreamKind::Exception,
        StreamKind::Freeze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loop => "LOOP",
            Self::Iteration => "ITERATION",
            Self::Candidate => "CANDIDATE",
            Self::Run => "RUN",
            Self::Approval => "APPROVAL",
            Self::Decision => "DECISION",
            Self::Governance => "GOVERNANCE",
            Self::Exception => "EXCEPTION",
            Self::Freeze => "FREEZE",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.to_ascii_uppercase();
        StreamKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == upper)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "invalid stream_kind '{}'; expected one of: LOOP, ITERATION, CANDIDATE, RUN, APPROVAL, DECISION, GOVERNANCE, EXCEPTION, FREEZE",
                    value
                ))
            })
    }
}

/// Relation names carried on typed refs.
pub mod rel {
    /// The only relation along which staleness propagates.
    pub const DEPENDS_ON: &str = "depends_on";
    pub const ABOUT: &str = "about";
    pub const SUPPORTED_BY: &str = "supported_by";
    pub const RELATES_TO: &str = "relates_to";
    pub const APPROVES: &str = "approves";
    pub const ACKNOWLEDGES: &str = "acknowledges";
    pub const ROOT_CAUSE: &str = "root_cause";
    pub const STALE: &str = "stale";
    pub const RESOLVED_BY: &str = "resolved_by";
    pub const IN_SCOPE_OF: &str = "in_scope_of";
}

/// Entity kind names used by the ledger's own records.
pub mod entity {
    pub const GOVERNED_ARTIFACT: &str = "GovernedArtifact";
    pub const ORACLE_SUITE: &str = "OracleSuite";
    pub const CANDIDATE: &str = "Candidate";
    pub const LOOP: &str = "Loop";
    pub const ITERATION: &str = "Iteration";
    pub const RUN: &str = "Run";
    pub const APPROVAL: &str = "Approval";
    pub const DECISION: &str = "Decision";
    pub const EXCEPTION: &str = "Exception";
    pub const FREEZE: &str = "Freeze";
    pub const STALE_MARKER: &str = "StaleMarker";
}

/// Event type names emitted by ledger commands.
pub mod event_types {
    pub const APPROVAL_RECORDED: &str = "ApprovalRecorded";
    pub const DECISION_RECORDED: &str = "DecisionRecorded";
    pub const DEVIATION_CREATED: &str = "DeviationCreated";
    pub const DEFERRAL_CREATED: &str = "DeferralCreated";
    pub const WAIVER_CREATED: &str = "WaiverCreated";
    pub const EXCEPTION_ACTIVATED: &str = "ExceptionActivated";
    pub const EXCEPTION_RESOLVED: &str = "ExceptionResolved";
    pub const NODE_MARKED_STALE: &str = "NodeMarkedStale";
    pub const STALENESS_RESOLVED: &str = "StalenessResolved";
    pub const GOVERNED_ARTIFACT_VERSION_RECORDED: &str = "GovernedArtifactVersionRecorded";
    pub const ORACLE_SUITE_REBASED: &str = "OracleSuiteRebased";
    pub const INTEGRITY_CONDITION_DETECTED: &str = "IntegrityConditionDetected";

    /// Types that only enter the ledger through their dedicated commands.
    pub const RESERVED: [&str; 9] = [
        APPROVAL_RECORDED,
        DECISION_RECORDED,
        DEVIATION_CREATED,
        DEFERRAL_CREATED,
        WAIVER_CREATED,
        EXCEPTION_ACTIVATED,
        EXCEPTION_RESOLVED,
        NODE_MARKED_STALE,
        STALENESS_RESOLVED,
    ];

    pub fn is_reserved(event_type: &str) -> bool {
        RESERVED.contains(&event_type)
    }
}

/// Identity of a governed entity, independent of relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn validate(&self, field: &str) -> Result<(), LedgerError> {
        if self.kind.trim().is_empty() || self.id.trim().is_empty() {
            return Err(LedgerError::Validation(format!(
                "{field}.kind and {field}.id are required"
            )));
        }
        Ok(())
    }

    pub fn with_rel(&self, rel: &str) -> TypedRef {
        TypedRef::new(self.kind.clone(), self.id.clone(), rel)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Typed edge descriptor embedded in events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedRef {
    pub kind: String,
    pub id: String,
    pub rel: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
}

impl TypedRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, rel: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            rel: rel.into(),
            meta: Value::Null,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.kind.clone(), self.id.clone())
    }

    pub fn is_propagating(&self) -> bool {
        self.rel == rel::DEPENDS_ON
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.kind.trim().is_empty() || self.id.trim().is_empty() || self.rel.trim().is_empty()
        {
            return Err(LedgerError::Validation(format!(
                "typed ref requires kind, id and rel (got kind='{}', id='{}', rel='{}')",
                self.kind, self.id, self.rel
            )));
        }
        Ok(())
    }
}

/// Sequenced, hash-chained ledger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub stream_id: String,
    pub stream_kind: StreamKind,
    pub stream_seq: u64,
    pub global_seq: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_kind: ActorKind,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub supersedes: Vec<String>,
    #[serde(default)]
    pub refs: Vec<TypedRef>,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub event_hash: String,
}

impl EventEnvelope {
    pub fn actor(&self) -> Actor {
        Actor::new(self.actor_kind, self.actor_id.clone())
    }

    /// The entity this event is about.
    ///
    /// An explicit `about` ref wins; otherwise the stream id names the entity
    /// and its kind comes from the stream kind (or event type for governance
    /// streams).
    pub fn subject(&self) -> EntityRef {
        if let Some(about) = self.refs.iter().find(|r| r.rel == rel::ABOUT) {
            return about.entity();
        }
        EntityRef::new(
            infer_subject_kind(self.stream_kind, &self.event_type),
            self.stream_id.clone(),
        )
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

fn infer_subject_kind(stream_kind: StreamKind, event_type: &str) -> &'static str {
    match stream_kind {
        StreamKind::Loop => entity::LOOP,
        StreamKind::Iteration => entity::ITERATION,
        StreamKind::Candidate => entity::CANDIDATE,
        StreamKind::Run => entity::RUN,
        StreamKind::Approval => entity::APPROVAL,
        StreamKind::Decision => entity::DECISION,
        StreamKind::Exception => entity::EXCEPTION,
        StreamKind::Freeze => entity::FREEZE,
        StreamKind::Governance => {
            if event_type.starts_with("GovernedArtifact") {
                entity::GOVERNED_ARTIFACT
            } else if event_type.starts_with("OracleSuite") {
                entity::ORACLE_SUITE
            } else if event_type == event_types::NODE_MARKED_STALE
                || event_type == event_types::STALENESS_RESOLVED
            {
                entity::STALE_MARKER
            } else {
                "Governance"
            }
        }
    }
}

/// An event as submitted, before sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Caller-chosen id for idempotent retries; generated when absent.
    #[serde(default)]
    pub event_id: Option<String>,
    pub stream_id: String,
    pub stream_kind: StreamKind,
    pub event_type: String,
    pub actor: Actor,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub supersedes: Vec<String>,
    #[serde(default)]
    pub refs: Vec<TypedRef>,
    #[serde(default)]
    pub payload: Value,
}

impl NewEvent {
    pub fn new(
        stream_id: impl Into<String>,
        stream_kind: StreamKind,
        event_type: impl Into<String>,
        actor: Actor,
    ) -> Self {
        Self {
            event_id: None,
            stream_id: stream_id.into(),
            stream_kind,
            event_type: event_type.into(),
            actor,
            correlation_id: None,
            causation_id: None,
            supersedes: Vec::new(),
            refs: Vec::new(),
            payload: Value::Object(Default::default()),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_refs(mut self, refs: Vec<TypedRef>) -> Self {
        self.refs = refs;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_causation(mut self, causation_id: Option<String>) -> Self {
        self.causation_id = causation_id;
        self
    }

    pub fn superseding(mut self, event_ids: Vec<String>) -> Self {
        self.supersedes = event_ids;
        self
    }

    /// Shape checks that need no store access.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.stream_id.trim().is_empty() {
            return Err(LedgerError::Validation("stream_id is required".to_string()));
        }
        if self.event_type.trim().is_empty() {
            return Err(LedgerError::Validation("event_type is required".to_string()));
        }
        if self.actor.id.trim().is_empty() {
            return Err(LedgerError::Validation("actor id is required".to_string()));
        }
        if matches!(&self.event_id, Some(id) if id.trim().is_empty()) {
            return Err(LedgerError::Validation(
                "event_id must not be blank when provided".to_string(),
            ));
        }
        for typed_ref in &self.refs {
            typed_ref.validate()?;
        }
        Ok(())
    }
}

/// Optimistic concurrency expectation for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedVersion {
    #[default]
    Any,
    /// The stream must currently hold exactly this many events.
    Exact(u64),
}

/// Sequence numbers assigned to an appended event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub event_id: String,
    pub stream_seq: u64,
    pub global_seq: u64,
    /// True when the append matched an already stored event.
    pub duplicate: bool,
}

pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 500;

/// Event query filter. Results are ordered by `global_seq`, ascending unless
/// `descending` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub stream_kind: Option<StreamKind>,
    #[serde(default)]
    pub actor_kind: Option<ActorKind>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// The last `global_seq` of the previous page (exclusive bound).
    #[serde(default)]
    pub cursor: Option<u64>,
    /// Newest first.
    #[serde(default)]
    pub descending: bool,
}

impl EventFilter {
    pub fn event_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }

    /// Matches ignoring cursor and limit.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        self.stream_kind.map_or(true, |k| event.stream_kind == k)
            && self.actor_kind.map_or(true, |k| event.actor_kind == k)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
            && self
                .stream_id
                .as_deref()
                .map_or(true, |s| event.stream_id == s)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<EventEnvelope>,
    /// All events matching the filter, regardless of cursor and limit.
    pub total_count: usize,
    pub has_more: bool,
    pub next_cursor: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_kind_parses_case_insensitively() {
        assert_eq!("governance".parse::<StreamKind>().unwrap(), StreamKind::Governance);
        assert_eq!("FREEZE".parse::<StreamKind>().unwrap(), StreamKind::Freeze);
        assert!("WORKFLOW".parse::<StreamKind>().is_err());
    }

    #[test]
    fn stream_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&StreamKind::Candidate).unwrap();
        assert_eq!(json, "\"CANDIDATE\"");
    }

    #[test]
    fn only_depends_on_propagates() {
        assert!(TypedRef::new("GovernedArtifact", "SR-SPEC", "depends_on").is_propagating());
        for other in ["supported_by", "relates_to", "approves", "about"] {
            assert!(!TypedRef::new("Candidate", "c", other).is_propagating());
        }
    }

    #[test]
    fn blank_refs_are_rejected() {
        assert!(TypedRef::new("", "x", "depends_on").validate().is_err());
        assert!(TypedRef::new("Candidate", " ", "depends_on").validate().is_err());
        assert!(TypedRef::new("Candidate", "c", "").validate().is_err());
    }

    #[test]
    fn new_ids_carry_prefix() {
        let id = new_id("evt");
        assert!(id.starts_with("evt_"));
        assert_ne!(id, new_id("evt"));
    }

    #[test]
    fn record_streams_are_recognized_by_prefix() {
        assert!(is_record_stream(&new_id("stale")));
        assert!(is_record_stream("appr_forged"));
        assert!(is_record_stream("integ_1"));
        assert!(!is_record_stream("cand_1"));
        assert!(!is_record_stream("stalemate"));
        assert!(!is_record_stream("SR-SPEC"));
    }

    #[test]
    fn filter_limit_is_clamped() {
        let mut filter = EventFilter::default();
        assert_eq!(filter.effective_limit(), DEFAULT_QUERY_LIMIT);
        filter.limit = Some(0);
        assert_eq!(filter.effective_limit(), 1);
        filter.limit = Some(10_000);
        assert_eq!(filter.effective_limit(), MAX_QUERY_LIMIT);
    }

    #[test]
    fn reserved_types_cover_record_events() {
        assert!(event_types::is_reserved("ApprovalRecorded"));
        assert!(event_types::is_reserved("NodeMarkedStale"));
        assert!(!event_types::is_reserved("CandidateMaterialized"));
    }
}
