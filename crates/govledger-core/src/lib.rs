//! Governance event ledger.
//!
//! An append-only, totally ordered event log; a typed reference graph built
//! from the refs embedded in events; a staleness engine that marks everything
//! downstream of a changed entity; and the binding human records (approvals,
//! exceptions, decisions) that govern the loop.

#![deny(unsafe_code)]

pub mod actor;
pub mod error;
pub mod governance;
pub mod graph;
pub mod integrity;
pub mod ledger;
pub mod portal;
pub mod runtime;
pub mod staleness;
pub mod storage;
pub mod store;
pub mod types;

pub use actor::{authorize, Actor, ActorKind, Operation};
pub use error::{LedgerError, LedgerResult};
pub use governance::{
    effective_status, Approval, ApprovalDecision, ApprovalFilter, CreateException, Decision,
    DecisionFilter, Exception, ExceptionFilter, ExceptionKind, ExceptionScope, ExceptionStatus,
    ExceptionTransition, GovernanceService, RecordApproval, RecordDecision, RecordPage,
    ResolveException,
};
pub use graph::{Dependent, GraphProjection, ReferenceGraph};
pub use integrity::{IntegrityCondition, IntegrityRegistry};
pub use ledger::EventLog;
pub use runtime::{DomainAppend, GovernanceLedger, GovernanceLedgerConfig};
pub use staleness::{
    MarkOutcome, MarkRequest, MarkedDependent, MarkerStatus, ResolutionKind, ResolveOutcome,
    ResolveRequest, StaleMarker, StalenessConfig, StalenessEngine, StalenessReason,
};
pub use storage::{EventStorageConfig, PostgresEventStore};
pub use store::{scan, EventStore, LedgerStore};
pub use types::{
    entity, event_types, rel, AppendReceipt, EntityRef, EventEnvelope, EventFilter, EventPage,
    ExpectedVersion, NewEvent, StreamKind, TypedRef,
};
