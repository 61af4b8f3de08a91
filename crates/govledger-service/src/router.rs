//! API router

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health))
        // Events
        .route("/events", get(handlers::list_events).post(handlers::append_event))
        .route("/events/:event_id", get(handlers::get_event))
        // Staleness
        .route("/staleness/mark", post(handlers::mark_staleness))
        .route("/staleness/dependents", get(handlers::list_stale_dependents))
        .route("/staleness/blocking", get(handlers::staleness_blocking))
        .route("/staleness/:stale_id", get(handlers::get_stale_marker))
        .route("/staleness/:stale_id/resolve", post(handlers::resolve_staleness))
        // Approvals
        .route(
            "/approvals",
            get(handlers::list_approvals).post(handlers::record_approval),
        )
        .route("/approvals/:approval_id", get(handlers::get_approval))
        // Exceptions
        .route(
            "/exceptions",
            get(handlers::list_exceptions).post(handlers::create_exception),
        )
        .route("/exceptions/:exception_id", get(handlers::get_exception))
        .route(
            "/exceptions/:exception_id/activate",
            post(handlers::activate_exception),
        )
        .route(
            "/exceptions/:exception_id/resolve",
            post(handlers::resolve_exception),
        )
        // Decisions
        .route(
            "/decisions",
            get(handlers::list_decisions).post(handlers::record_decision),
        )
        .route("/decisions/:decision_id", get(handlers::get_decision))
        // Integrity
        .route(
            "/integrity/conditions",
            post(handlers::record_integrity_condition),
        )
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
