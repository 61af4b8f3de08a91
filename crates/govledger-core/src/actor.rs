//! Actor kinds and the capability table that gates every command.
//!
//! Authority is decided here and nowhere else: engines call [`authorize`]
//! with the operation they are about to perform.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of actor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    Human,
    Agent,
    System,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "HUMAN",
            Self::Agent => "AGENT",
            Self::System => "SYSTEM",
        }
    }

    /// Map identity-provider roles onto an actor kind.
    pub fn from_roles<S: AsRef<str>>(roles: &[S]) -> Self {
        if roles.iter().any(|r| r.as_ref() == "system") {
            Self::System
        } else if roles.iter().any(|r| r.as_ref() == "agent") {
            Self::Agent
        } else {
            Self::Human
        }
    }

    pub fn permits(&self, operation: Operation) -> bool {
        CAPABILITIES
            .iter()
            .find(|(op, _)| *op == operation)
            .map(|(_, kinds)| kinds.contains(self))
            .unwrap_or(false)
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorKind {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "HUMAN" => Ok(Self::Human),
            "AGENT" => Ok(Self::Agent),
            "SYSTEM" => Ok(Self::System),
            _ => Err(LedgerError::Validation(format!(
                "invalid actor_kind '{}'; expected one of: HUMAN, AGENT, SYSTEM",
                value
            ))),
        }
    }
}

/// Authenticated actor performing a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn human(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Human, id)
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Agent, id)
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self::new(ActorKind::System, id)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Commands subject to actor-kind authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AppendEvent,
    RecordApproval,
    CreateException,
    ActivateException,
    ResolveException,
    RecordDecision,
    MarkStale,
    ResolveStaleMechanical,
    ResolveStaleDecision,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppendEvent => "append events",
            Self::RecordApproval => "record approvals",
            Self::CreateException => "create exceptions",
            Self::ActivateException => "activate exceptions",
            Self::ResolveException => "resolve exceptions",
            Self::RecordDecision => "record decisions",
            Self::MarkStale => "mark staleness",
            Self::ResolveStaleMechanical => "resolve staleness mechanically",
            Self::ResolveStaleDecision => "resolve staleness by decision",
        }
    }
}

const ANY: &[ActorKind] = &[ActorKind::Human, ActorKind::Agent, ActorKind::System];
const HUMAN_ONLY: &[ActorKind] = &[ActorKind::Human];
const HUMAN_OR_SYSTEM: &[ActorKind] = &[ActorKind::Human, ActorKind::System];

const CAPABILITIES: &[(Operation, &[ActorKind])] = &[
    (Operation::AppendEvent, ANY),
    (Operation::RecordApproval, HUMAN_ONLY),
    (Operation::CreateException, HUMAN_ONLY),
    (Operation::ActivateException, HUMAN_ONLY),
    (Operation::ResolveException, HUMAN_ONLY),
    (Operation::RecordDecision, HUMAN_ONLY),
    (Operation::MarkStale, ANY),
    (Operation::ResolveStaleMechanical, HUMAN_OR_SYSTEM),
    (Operation::ResolveStaleDecision, HUMAN_ONLY),
];

/// Fail with `Authorization` unless `actor` may perform `operation`.
pub fn authorize(actor: &Actor, operation: Operation) -> Result<(), LedgerError> {
    if actor.kind.permits(operation) {
        Ok(())
    } else {
        tracing::warn!(actor = %actor, operation = operation.as_str(), "actor kind not permitted");
        Err(LedgerError::Authorization(format!(
            "{} actors may not {}",
            actor.kind,
            operation.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_records_are_human_only() {
        for op in [
            Operation::RecordApproval,
            Operation::CreateException,
            Operation::RecordDecision,
            Operation::ResolveStaleDecision,
        ] {
            assert!(ActorKind::Human.permits(op));
            assert!(!ActorKind::Agent.permits(op));
            assert!(!ActorKind::System.permits(op));
        }
    }

    #[test]
    fn system_may_resolve_mechanically() {
        assert!(ActorKind::System.permits(Operation::ResolveStaleMechanical));
        assert!(!ActorKind::Agent.permits(Operation::ResolveStaleMechanical));
    }

    #[test]
    fn roles_map_to_kinds() {
        assert_eq!(ActorKind::from_roles(&["system"]), ActorKind::System);
        assert_eq!(ActorKind::from_roles(&["reviewer", "agent"]), ActorKind::Agent);
        assert_eq!(ActorKind::from_roles(&["admin"]), ActorKind::Human);
        assert_eq!(ActorKind::from_roles::<&str>(&[]), ActorKind::Human);
    }

    #[test]
    fn authorize_reports_kind_and_operation() {
        let err = authorize(&Actor::agent("agent-7"), Operation::RecordApproval).unwrap_err();
        assert!(matches!(err, LedgerError::Authorization(_)));
        assert!(err.to_string().contains("AGENT"));
    }
}
