//! Model-training endpoints, all behind `require_admin`.
//!
//! - `POST /api/model-training/start`: spawn a run (409 if one is active)
//! - `GET /api/model-training/status`: current or last run snapshot
//! - `POST /api/model-training/stop`: kill the active run (409 if none)

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::api::types::{ApiContext, AuthUser};
use crate::training::{RunStatus, TrainingRequest, TrainingState};

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: RunStatus,
    pub message: &'static str,
}

/// `POST /api/model-training/start`
pub async fn start(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<TrainingRequest>,
) -> Result<(StatusCode, Json<TrainingState>), ApiError> {
    let state = ctx.core.training().start(request)?;
    tracing::info!(admin_id = %auth.id, run_id = ?state.run_id, "Training requested");
    Ok((StatusCode::ACCEPTED, Json(state)))
}

/// `GET /api/model-training/status`
pub async fn status(State(ctx): State<ApiContext>) -> Result<Json<TrainingState>, ApiError> {
    Ok(Json(ctx.core.training().snapshot()?))
}

/// `POST /api/model-training/stop`
///
/// Returns once the stop signal is sent; the run settles as `stopped`
/// asynchronously and `training_finished` is broadcast.
pub async fn stop(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<StopResponse>, ApiError> {
    ctx.core.training().stop()?;
    tracing::info!(admin_id = %auth.id, "Training stop requested");
    Ok(Json(StopResponse {
        status: RunStatus::Stopped,
        message: "Stop signal sent",
    }))
}
