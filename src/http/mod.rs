//! HTTP server module

mod api;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::service::QueryService;

pub use api::{ErrorBody, HealthResponse, StepsQuery};

/// Shared state behind every handler
pub struct AppState {
    pub service: QueryService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: QueryService) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/funnel", get(api::funnel))
        .route("/suggestions", get(api::suggestions))
        .route("/ingest/event", post(api::ingest_event))
        .route("/ingest/events", post(api::ingest_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
