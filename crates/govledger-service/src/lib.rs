//! govledger service library
//!
//! HTTP surface over [`govledger_core::GovernanceLedger`]: bearer-token
//! authentication, error mapping, configuration and server lifecycle.

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use auth::{Authenticated, TokenTable};
pub use config::ServiceConfig;
pub use error::{ApiError, ServiceError};
pub use router::build_router;
pub use server::Server;
pub use state::AppState;
