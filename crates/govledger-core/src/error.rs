use thiserror::Error;

/// Ledger errors.
///
/// The first four variants are the caller-facing taxonomy; `Storage` and
/// `Serialization` are infrastructure failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn invalid_transition(resource: &str, id: &str, from: &str, action: &str) -> Self {
        Self::Conflict(format!(
            "cannot {} {} '{}' in state {}",
            action, resource, id, from
        ))
    }

    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(LedgerError::Validation("x".into()).kind(), "VALIDATION_ERROR");
        assert_eq!(
            LedgerError::Authorization("x".into()).kind(),
            "AUTHORIZATION_ERROR"
        );
        assert_eq!(LedgerError::Conflict("x".into()).kind(), "CONFLICT");
        assert_eq!(LedgerError::not_found("Exception", "exc_1").kind(), "NOT_FOUND");
    }

    #[test]
    fn not_found_message_names_resource() {
        let err = LedgerError::not_found("StaleMarker", "stale_42");
        assert_eq!(err.to_string(), "StaleMarker 'stale_42' not found");
    }
}
