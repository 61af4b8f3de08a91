//! Bearer-token authentication.
//!
//! Tokens are issued elsewhere; the service only resolves a presented token
//! to the actor it was configured for.

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use govledger_core::{Actor, ActorKind};
use std::collections::HashMap;
use tracing::debug;

/// Token → actor lookup.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    actors: HashMap<String, Actor>,
}

impl TokenTable {
    pub fn from_config(config: &AuthConfig) -> Self {
        let actors = config
            .tokens
            .iter()
            .map(|grant| {
                let kind = ActorKind::from_roles(&grant.roles);
                (grant.token.clone(), Actor::new(kind, grant.actor_id.clone()))
            })
            .collect();
        Self { actors }
    }

    pub fn with_token(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.actors.insert(token.into(), actor);
        self
    }

    pub fn resolve(&self, token: &str) -> Option<&Actor> {
        self.actors.get(token)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

/// The actor behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
        let value = header
            .to_str()
            .map_err(|_| ApiError::Unauthorized("malformed authorization header".to_string()))?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("expected a bearer token".to_string()))?;

        let actor = state
            .tokens
            .resolve(token)
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("unknown bearer token".to_string()))?;
        debug!(actor = %actor, "request authenticated");
        Ok(Authenticated(actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenGrant;

    #[test]
    fn roles_decide_actor_kind() {
        let config = AuthConfig {
            tokens: vec![
                TokenGrant {
                    token: "t-sys".into(),
                    actor_id: "ci".into(),
                    roles: vec!["system".into()],
                },
                TokenGrant {
                    token: "t-agent".into(),
                    actor_id: "builder".into(),
                    roles: vec!["agent".into()],
                },
                TokenGrant {
                    token: "t-human".into(),
                    actor_id: "alice".into(),
                    roles: vec!["reviewer".into()],
                },
            ],
        };
        let table = TokenTable::from_config(&config);
        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve("t-sys"), Some(&Actor::system("ci")));
        assert_eq!(table.resolve("t-agent"), Some(&Actor::agent("builder")));
        assert_eq!(table.resolve("t-human"), Some(&Actor::human("alice")));
        assert_eq!(table.resolve("nope"), None);
    }
}
