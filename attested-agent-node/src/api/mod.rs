//! Monitoring API
//!
//! Read-mostly HTTP surface over the running agent. The only write is
//! `POST /api/check-verification`, which asks the platform whether a human
//! has claimed the agent yet. Nothing here can make the agent post, vote or
//! pause.

pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use attested_agent::AgentRuntime;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppContext {
    pub runtime: Arc<AgentRuntime>,
}

impl AppContext {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

/// Create the API router
pub fn create_router(context: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(routes::api_status))
        .route("/api/check-verification", post(routes::api_check_verification))
        .route("/api/activity", get(routes::api_activity))
        .route("/api/feed", get(routes::api_feed))
        .route("/api/memory", get(routes::api_memory))
        .route("/api/config", get(routes::api_config))
        .route("/api/attestation", get(routes::api_attestation))
        .route("/api/birth-certificate", get(routes::api_birth_certificate))
        // Health check
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(context)
}
