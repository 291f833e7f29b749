//! Execution endpoint handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;

use atp_core::executor::SubmitRequest;

use crate::api::error::{as_interface_error, ApiError, ApiResult};
use crate::api::models::{ExecutionResponse, ResumeBody};
use crate::api::routes::AppState;

/// Submit a program for execution
///
/// POST /api/v1/executions
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<Json<ExecutionResponse>> {
    let execution_id = request.execution_id.clone();
    match state.engine.submit(request).await {
        Ok(outcome) => Ok(Json(ExecutionResponse::from_outcome(outcome))),
        Err(error) => match as_interface_error(&error) {
            Some(api_error) => Err(api_error),
            None => Ok(Json(ExecutionResponse::failed(execution_id, &error))),
        },
    }
}

/// Resume a paused execution with callback results
///
/// POST /api/v1/executions/:id/resume
pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResumeBody>,
) -> ApiResult<Json<ExecutionResponse>> {
    let results = body.parsed().map_err(ApiError::BadRequest)?;
    match state.engine.resume(&id, results).await {
        Ok(outcome) => Ok(Json(ExecutionResponse::from_outcome(outcome))),
        Err(error) => match as_interface_error(&error) {
            Some(api_error) => Err(api_error),
            None => Ok(Json(ExecutionResponse::failed(Some(id), &error))),
        },
    }
}

/// Current status of an execution
///
/// GET /api/v1/executions/:id
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<atp_core::StatusReport>> {
    match state.engine.status(&id).await {
        Ok(report) => Ok(Json(report)),
        Err(error) => Err(as_interface_error(&error)
            .unwrap_or_else(|| ApiError::Internal(error.to_string()))),
    }
}

/// Cancel an execution
///
/// POST /api/v1/executions/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    match state.engine.cancel(&id).await {
        Ok(()) => Ok(Json(json!({"cancelled": true, "executionId": id}))),
        Err(error) => Err(as_interface_error(&error)
            .unwrap_or_else(|| ApiError::Internal(error.to_string()))),
    }
}

/// Liveness plus engine counters
///
/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let counts = state.engine.state().counts();
    Json(json!({
        "status": "ok",
        "executions": counts,
    }))
}
