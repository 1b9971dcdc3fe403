//! `GET /api/doctors`: active doctors with their patient counts.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::db::{self, DoctorSummary};

pub async fn list(State(ctx): State<ApiContext>) -> Result<Json<Vec<DoctorSummary>>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(db::list_doctors(&conn)?))
}
