//! Integrity conditions and the oracle → condition registry consulted before
//! a waiver is accepted.

use crate::actor::{authorize, Actor, Operation};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{scan, EventStore};
use crate::types::{
    event_types, new_id, rel, EventFilter, ExpectedVersion, NewEvent, StreamKind, TypedRef,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Conditions that can never be waived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityCondition {
    OracleTamper,
    OracleGap,
    OracleEnvMismatch,
    OracleFlake,
    EvidenceMissing,
}

impl IntegrityCondition {
    pub const ALL: [IntegrityCondition; 5] = [
        IntegrityCondition::OracleTamper,
        IntegrityCondition::OracleGap,
        IntegrityCondition::OracleEnvMismatch,
        IntegrityCondition::OracleFlake,
        IntegrityCondition::EvidenceMissing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OracleTamper => "ORACLE_TAMPER",
            Self::OracleGap => "ORACLE_GAP",
            Self::OracleEnvMismatch => "ORACLE_ENV_MISMATCH",
            Self::OracleFlake => "ORACLE_FLAKE",
            Self::EvidenceMissing => "EVIDENCE_MISSING",
        }
    }

    /// First condition code appearing literally in `text`.
    pub fn find_in(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|condition| text.contains(condition.as_str()))
    }
}

impl fmt::Display for IntegrityCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrityCondition {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|condition| condition.as_str() == upper)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "unknown integrity condition '{}'; expected one of: ORACLE_TAMPER, ORACLE_GAP, ORACLE_ENV_MISMATCH, ORACLE_FLAKE, EVIDENCE_MISSING",
                    value
                ))
            })
    }
}

/// Maps oracles to the integrity condition their failures represent.
///
/// Sources, in order: static configuration, a condition code embedded in the
/// oracle id, then the most recent `IntegrityConditionDetected` event.
#[derive(Debug, Clone, Default)]
pub struct IntegrityRegistry {
    configured: HashMap<String, IntegrityCondition>,
}

impl IntegrityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(entries: &HashMap<String, String>) -> LedgerResult<Self> {
        let mut registry = Self::new();
        for (oracle_id, code) in entries {
            registry
                .configured
                .insert(oracle_id.clone(), code.parse::<IntegrityCondition>()?);
        }
        Ok(registry)
    }

    pub fn with_condition(mut self, oracle_id: impl Into<String>, condition: IntegrityCondition) -> Self {
        self.configured.insert(oracle_id.into(), condition);
        self
    }

    pub async fn condition_for_oracle(
        &self,
        store: &dyn EventStore,
        oracle_id: &str,
    ) -> LedgerResult<Option<IntegrityCondition>> {
        if let Some(condition) = self.configured.get(oracle_id) {
            return Ok(Some(*condition));
        }
        if let Some(condition) = IntegrityCondition::find_in(oracle_id) {
            return Ok(Some(condition));
        }

        let detections = scan(
            store,
            EventFilter::event_type(event_types::INTEGRITY_CONDITION_DETECTED),
        )
        .await?;
        Ok(detections
            .iter()
            .rev()
            .filter(|event| event.payload_str("oracle_id") == Some(oracle_id))
            .find_map(|event| {
                event
                    .payload_str("condition")
                    .and_then(|code| code.parse::<IntegrityCondition>().ok())
            }))
    }

    /// Append an `IntegrityConditionDetected` event for `oracle_id`.
    pub async fn record_detection(
        store: &dyn EventStore,
        actor: &Actor,
        oracle_id: &str,
        condition: IntegrityCondition,
        detail: Option<String>,
    ) -> LedgerResult<String> {
        authorize(actor, Operation::AppendEvent)?;
        if oracle_id.trim().is_empty() {
            return Err(LedgerError::Validation("oracle_id is required".to_string()));
        }

        let event = NewEvent::new(
            new_id("integ"),
            StreamKind::Governance,
            event_types::INTEGRITY_CONDITION_DETECTED,
            actor.clone(),
        )
        .with_refs(vec![TypedRef::new("Oracle", oracle_id, rel::ABOUT)])
        .with_payload(serde_json::json!({
            "oracle_id": oracle_id,
            "condition": condition.as_str(),
            "detail": detail,
        }));

        let receipt = store.append(event, ExpectedVersion::Exact(0)).await?;
        tracing::info!(oracle_id, condition = condition.as_str(), "integrity condition recorded");
        Ok(receipt.event_id)
    }
}
