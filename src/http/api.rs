//! REST API handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::EngineError;
use crate::events::NewEvent;
use crate::storage::AppendReport;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Store version, bumped on every append
    pub version: u64,
    /// Readable events in the store
    pub events: usize,
    pub uptime_seconds: u64,
}

/// `?steps=a,b,c`
#[derive(Debug, Deserialize)]
pub struct StepsQuery {
    #[serde(default)]
    pub steps: String,
}

/// Body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::InsufficientData(_) | EngineError::NoFeatures => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.kind().to_string(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_body(rejection: JsonRejection) -> EngineError {
    EngineError::Validation(rejection.body_text())
}

pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, EngineError> {
    let (version, events) = state.service.status().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version,
        events,
        uptime_seconds: state.uptime_seconds(),
    }))
}

pub async fn funnel(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StepsQuery>,
) -> Result<Response, EngineError> {
    let result = state.service.funnel(&q.steps).await?;
    Ok(Json(&*result).into_response())
}

pub async fn suggestions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StepsQuery>,
) -> Result<Response, EngineError> {
    let result = state.service.suggestions(&q.steps).await?;
    Ok(Json(&*result).into_response())
}

pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> Result<Json<AppendReport>, EngineError> {
    let Json(event) = payload.map_err(bad_body)?;
    state.service.ingest(vec![event]).await.map(Json)
}

pub async fn ingest_events(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<NewEvent>>, JsonRejection>,
) -> Result<Json<AppendReport>, EngineError> {
    let Json(batch) = payload.map_err(bad_body)?;
    state.service.ingest(batch).await.map(Json)
}
