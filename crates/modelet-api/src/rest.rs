//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use modelet_core::{ModelEvent, ModelOperation, ModelReplicaState, ResidencyState};
use modelet_state::CommandHandler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Application state shared across handlers
pub struct AppState {
    pub handler: Arc<CommandHandler>,
}

/// Create the API router
pub fn create_router(handler: Arc<CommandHandler>) -> Router {
    let state = Arc::new(AppState { handler });

    Router::new()
        .route("/api/v1/models", get(list_models))
        .route("/api/v1/models/:name/ensure", post(ensure_model))
        .route("/api/v1/memory", get(get_memory))
        .route("/api/v1/operations", post(apply_operation))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// List tracked models and their residency
async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModelReplicaState>>, (StatusCode, String)> {
    Ok(Json(state.handler.state().model_states()))
}

/// Make a model resident ahead of an inference request
async fn ensure_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    debug!(model = %name, "Ensuring model is loaded");

    state
        .handler
        .state()
        .ensure_load_model(&name)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Memory report
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub available_with_overcommit_bytes: u64,
}

/// Get replica memory
async fn get_memory(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MemoryResponse>, (StatusCode, String)> {
    let manager = state.handler.state();
    Ok(Json(MemoryResponse {
        total_bytes: manager.total_memory_bytes(),
        available_bytes: manager.get_available_memory_bytes(),
        available_with_overcommit_bytes: manager.available_memory_with_overcommit(),
    }))
}

/// Apply a scheduler command
async fn apply_operation(
    State(state): State<Arc<AppState>>,
    Json(operation): Json<ModelOperation>,
) -> Result<Json<ModelEvent>, (StatusCode, String)> {
    info!(
        model = %operation.model_version,
        operation = %operation.operation,
        tick = operation.tick,
        "Received model command"
    );

    let event = state.handler.handle(&operation).await.ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            format!(
                "Command for {} at tick {} is out of order",
                operation.model_version, operation.tick
            ),
        )
    })?;

    Ok(Json(event))
}

/// System status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub server: String,
    pub server_live: bool,
    pub models: usize,
    pub resident_models: usize,
    pub available_memory_bytes: u64,
}

/// Get system status
async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let manager = state.handler.state();
    let models = manager.model_states();
    let resident_models = models
        .iter()
        .filter(|m| m.state == ResidencyState::Resident)
        .count();

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        server: manager.server_name().to_string(),
        server_live: manager.server_live().await.is_ok(),
        models: models.len(),
        resident_models,
        available_memory_bytes: manager.get_available_memory_bytes(),
    }))
}
