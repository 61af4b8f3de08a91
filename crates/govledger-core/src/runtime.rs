use crate::actor::{authorize, Actor, Operation};
use crate::error::{LedgerError, LedgerResult};
use crate::governance::{ExceptionStatus, ExceptionTransition, GovernanceService};
use crate::graph::GraphProjection;
use crate::integrity::{IntegrityCondition, IntegrityRegistry};
use crate::staleness::{MarkOutcome, StalenessConfig, StalenessEngine};
use crate::storage::EventStorageConfig;
use crate::store::{EventStore, LedgerStore};
use crate::types::{
    event_types, is_record_stream, AppendReceipt, EventEnvelope, ExpectedVersion, NewEvent,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Actor used for marks triggered by upstream events.
pub const PROPAGATION_ACTOR_ID: &str = "staleness-engine";

/// Ledger runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct GovernanceLedgerConfig {
    pub storage: EventStorageConfig,
    pub staleness: StalenessConfig,
    /// Oracle id → integrity condition code.
    pub oracle_conditions: HashMap<String, String>,
}

/// Result of appending a domain event, including any staleness it caused.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DomainAppend {
    pub receipt: AppendReceipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagated: Option<MarkOutcome>,
}

/// Composes the event store, reference graph, staleness engine and
/// governance records over one shared log.
pub struct GovernanceLedger {
    store: Arc<LedgerStore>,
    graph: Arc<GraphProjection>,
    staleness: StalenessEngine,
    governance: GovernanceService,
    config: GovernanceLedgerConfig,
}

impl GovernanceLedger {
    pub async fn bootstrap(config: GovernanceLedgerConfig) -> LedgerResult<Self> {
        let store = Arc::new(LedgerStore::bootstrap(config.storage.clone()).await?);
        if !store.verify_chain()? {
            return Err(LedgerError::Storage(
                "event hash chain verification failed".to_string(),
            ));
        }
        let integrity = IntegrityRegistry::from_config(&config.oracle_conditions)?;
        let ledger = Self::assemble(store, integrity, config);
        info!(
            storage = ledger.config.storage.label(),
            events = ledger.store.len()?,
            "governance ledger ready"
        );
        Ok(ledger)
    }

    pub fn in_memory() -> Self {
        Self::assemble(
            Arc::new(LedgerStore::in_memory()),
            IntegrityRegistry::new(),
            GovernanceLedgerConfig::default(),
        )
    }

    pub fn with_integrity(store: Arc<LedgerStore>, integrity: IntegrityRegistry) -> Self {
        Self::assemble(store, integrity, GovernanceLedgerConfig::default())
    }

    fn assemble(
        store: Arc<LedgerStore>,
        integrity: IntegrityRegistry,
        config: GovernanceLedgerConfig,
    ) -> Self {
        let dyn_store: Arc<dyn EventStore> = store.clone();
        let graph = Arc::new(GraphProjection::new(dyn_store.clone()));
        let staleness =
            StalenessEngine::new(dyn_store.clone(), graph.clone(), config.staleness.clone());
        let governance = GovernanceService::new(dyn_store, integrity);
        Self {
            store,
            graph,
            staleness,
            governance,
            config,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn graph(&self) -> &GraphProjection {
        &self.graph
    }

    pub fn staleness(&self) -> &StalenessEngine {
        &self.staleness
    }

    pub fn governance(&self) -> &GovernanceService {
        &self.governance
    }

    pub fn config(&self) -> &GovernanceLedgerConfig {
        &self.config
    }

    /// Append a domain event and mark the dependents of anything it changed.
    ///
    /// Record and staleness event types are rejected here, as are appends
    /// into marker or record streams; they only enter the log through their
    /// own commands. A duplicate retry re-runs propagation so a failed mark
    /// converges on the next attempt.
    pub async fn append_event(
        &self,
        actor: &Actor,
        event: NewEvent,
        expected: ExpectedVersion,
    ) -> LedgerResult<DomainAppend> {
        authorize(actor, Operation::AppendEvent)?;
        if event_types::is_reserved(&event.event_type) {
            return Err(LedgerError::Validation(format!(
                "event type '{}' is reserved; use the dedicated command",
                event.event_type
            )));
        }
        if event.actor != *actor {
            return Err(LedgerError::Validation(
                "event actor must match the authenticated actor".to_string(),
            ));
        }

        self.ensure_domain_stream(&event.stream_id).await?;

        let receipt = self.store.append(event, expected).await?;
        let propagated = self.propagate(&receipt.event_id).await?;
        Ok(DomainAppend {
            receipt,
            propagated,
        })
    }

    /// Activate an exception and mark its dependents stale.
    ///
    /// Activating an exception that is still ACTIVE conflicts, but first
    /// re-runs the propagation of its activation.
    pub async fn activate_exception(
        &self,
        actor: &Actor,
        exception_id: &str,
    ) -> LedgerResult<ExceptionTransition> {
        match self.governance.activate_exception(actor, exception_id).await {
            Ok((transition, envelope)) => {
                self.propagate_envelope(&envelope).await?;
                Ok(transition)
            }
            Err(LedgerError::Conflict(detail)) => {
                let exception = self.governance.get_exception(exception_id).await?;
                if exception.status == ExceptionStatus::Active {
                    let activation = self
                        .store
                        .read_stream(exception_id)
                        .await?
                        .into_iter()
                        .find(|e| e.event_type == event_types::EXCEPTION_ACTIVATED);
                    if let Some(envelope) = activation {
                        self.propagate_envelope(&envelope).await?;
                    }
                }
                Err(LedgerError::Conflict(detail))
            }
            Err(err) => Err(err),
        }
    }

    /// Record an integrity condition observed for an oracle.
    pub async fn record_integrity_condition(
        &self,
        actor: &Actor,
        oracle_id: &str,
        condition: IntegrityCondition,
        detail: Option<String>,
    ) -> LedgerResult<String> {
        IntegrityRegistry::record_detection(
            self.store.as_ref(),
            actor,
            oracle_id,
            condition,
            detail,
        )
        .await
    }

    async fn ensure_domain_stream(&self, stream_id: &str) -> LedgerResult<()> {
        let owned = is_record_stream(stream_id)
            || self
                .store
                .read_stream(stream_id)
                .await?
                .first()
                .map_or(false, |e| event_types::is_reserved(&e.event_type));
        if owned {
            return Err(LedgerError::Validation(format!(
                "stream '{}' belongs to a marker or governance record",
                stream_id
            )));
        }
        Ok(())
    }

    async fn propagate(&self, event_id: &str) -> LedgerResult<Option<MarkOutcome>> {
        match self.store.get(event_id).await? {
            Some(envelope) => self.propagate_envelope(&envelope).await,
            None => Ok(None),
        }
    }

    async fn propagate_envelope(&self, envelope: &EventEnvelope) -> LedgerResult<Option<MarkOutcome>> {
        let system = Actor::system(PROPAGATION_ACTOR_ID);
        match self.staleness.propagate(&system, envelope).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // The triggering event is already committed.
                warn!(
                    event_id = %envelope.event_id,
                    error = %err,
                    "staleness propagation failed"
                );
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for GovernanceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
