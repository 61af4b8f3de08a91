//! Application state for API handlers

use crate::auth::TokenTable;
use crate::config::ServiceConfig;
use crate::error::ServiceResult;
use chrono::{DateTime, Utc};
use govledger_core::GovernanceLedger;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<GovernanceLedger>,
    pub tokens: Arc<TokenTable>,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(ledger: GovernanceLedger, tokens: TokenTable) -> Self {
        Self {
            ledger: Arc::new(ledger),
            tokens: Arc::new(tokens),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }

    pub async fn bootstrap(config: &ServiceConfig) -> ServiceResult<Self> {
        let ledger = GovernanceLedger::bootstrap(config.ledger_config()).await?;
        let tokens = TokenTable::from_config(&config.auth);
        if tokens.is_empty() {
            tracing::warn!("no bearer tokens configured; every mutating request will be rejected");
        }
        Ok(Self::new(ledger, tokens))
    }
}
