//! API request handlers

mod approvals;
mod decisions;
mod events;
mod exceptions;
mod health;
mod integrity;
mod staleness;

pub use approvals::*;
pub use decisions::*;
pub use events::*;
pub use exceptions::*;
pub use health::*;
pub use integrity::*;
pub use staleness::*;

use govledger_core::{rel, TypedRef};
use serde::Deserialize;
use serde_json::Value;

/// Typed reference as submitted by clients; `rel` defaults to `relates_to`.
#[derive(Debug, Deserialize)]
pub struct RefRequest {
    pub kind: String,
    pub id: String,
    #[serde(default = "default_rel")]
    pub rel: String,
    #[serde(default)]
    pub meta: Value,
}

fn default_rel() -> String {
    rel::RELATES_TO.to_string()
}

impl From<RefRequest> for TypedRef {
    fn from(value: RefRequest) -> Self {
        TypedRef::new(value.kind, value.id, value.rel).with_meta(value.meta)
    }
}

pub(crate) fn typed_refs(refs: Vec<RefRequest>) -> Vec<TypedRef> {
    refs.into_iter().map(TypedRef::from).collect()
}
