//! Retinal analysis endpoints.
//!
//! - `POST /api/analysis`: record a result (doctor)
//! - `GET /api/analysis`: role-scoped list
//! - `GET /api/analysis/:id`: role-scoped detail
//! - `PATCH /api/analysis/:id/status`: review workflow (doctor/admin)

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::extract::{ApiJson, ApiQuery};
use crate::api::types::{ApiContext, AuthUser};
use crate::authorization::record_scope;
use crate::broadcast::{Audience, WsOutgoing, CLINICIANS};
use crate::db;
use crate::models::enums::{AnalysisStatus, Condition, Severity};
use crate::models::RetinalAnalysis;

/// Model version stamped on results that do not name one.
pub const DEFAULT_MODEL_VERSION: &str = "fusion-v1";

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct CreateAnalysisRequest {
    pub patient_id: Uuid,
    pub condition_detected: Condition,
    pub confidence_score: Option<f64>,
    pub severity: Option<Severity>,
    pub recommendations: Option<String>,
    pub consultation_duration: Option<f64>,
    pub model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub patient_id: Option<Uuid>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: AnalysisStatus,
}

fn validate(request: &CreateAnalysisRequest) -> Result<(), ApiError> {
    if let Some(score) = request.confidence_score {
        if !(0.0..=1.0).contains(&score) {
            return Err(ApiError::BadRequest(
                "confidence_score must be between 0 and 1".into(),
            ));
        }
    }
    if let Some(duration) = request.consultation_duration {
        if !duration.is_finite() || duration < 0.0 {
            return Err(ApiError::BadRequest(
                "consultation_duration must be a non-negative number of seconds".into(),
            ));
        }
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|e| ApiError::BadRequest(format!("Invalid analysis ID: {e}")))
}

/// `POST /api/analysis`: behind `require_doctor`.
///
/// The patient must be assigned to the caller. The prediction counter for
/// the model version is a second, independent write: a failure there is
/// logged and the created analysis is still returned.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<CreateAnalysisRequest>,
) -> Result<(StatusCode, Json<RetinalAnalysis>), ApiError> {
    validate(&request)?;

    let conn = ctx.core.open_db()?;
    let patient = db::get_patient_scoped(&conn, &request.patient_id, &record_scope(&auth.caller()))?
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))?;

    let now = Utc::now();
    let model_version = request
        .model_version
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string());

    let analysis = RetinalAnalysis {
        id: Uuid::new_v4(),
        patient_id: patient.id,
        doctor_id: auth.id,
        condition_detected: request.condition_detected,
        confidence_score: request.confidence_score,
        severity: request.severity,
        recommendations: request.recommendations,
        consultation_duration: request.consultation_duration,
        model_version,
        status: AnalysisStatus::Completed,
        created_at: now,
    };
    db::insert_analysis(&conn, &analysis)?;

    if let Err(e) = db::record_prediction(&conn, &analysis.model_version, now.date_naive(), now) {
        tracing::error!(error = %e, model_version = %analysis.model_version, "Prediction counter not updated");
    }

    tracing::info!(
        analysis_id = %analysis.id,
        patient_id = %analysis.patient_id,
        condition = %analysis.condition_detected,
        "Analysis recorded"
    );
    ctx.core.broadcast(
        WsOutgoing::AnalysisCreated {
            analysis: analysis.clone(),
        },
        Audience::Roles(CLINICIANS),
    );

    Ok((StatusCode::CREATED, Json(analysis)))
}

/// `GET /api/analysis?patient_id=&limit=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<Vec<RetinalAnalysis>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let conn = ctx.core.open_db()?;
    let analyses = db::list_analyses(
        &conn,
        &record_scope(&auth.caller()),
        query.patient_id.as_ref(),
        limit,
    )?;
    Ok(Json(analyses))
}

/// `GET /api/analysis/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(analysis_id): Path<String>,
) -> Result<Json<RetinalAnalysis>, ApiError> {
    let id = parse_id(&analysis_id)?;
    let conn = ctx.core.open_db()?;
    db::get_analysis_scoped(&conn, &id, &record_scope(&auth.caller()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Analysis not found".into()))
}

/// `PATCH /api/analysis/:id/status`: behind `require_clinician`.
pub async fn update_status(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(analysis_id): Path<String>,
    ApiJson(update): ApiJson<StatusUpdate>,
) -> Result<Json<RetinalAnalysis>, ApiError> {
    let id = parse_id(&analysis_id)?;
    let scope = record_scope(&auth.caller());

    let conn = ctx.core.open_db()?;
    if db::get_analysis_scoped(&conn, &id, &scope)?.is_none() {
        return Err(ApiError::NotFound("Analysis not found".into()));
    }
    db::update_analysis_status(&conn, &id, update.status)?;
    let analysis = db::get_analysis_scoped(&conn, &id, &scope)?
        .ok_or_else(|| ApiError::NotFound("Analysis not found".into()))?;

    tracing::info!(analysis_id = %id, status = %update.status, "Analysis status updated");
    ctx.core.broadcast(
        WsOutgoing::AnalysisUpdated {
            analysis_id: id,
            status: update.status,
        },
        Audience::Roles(CLINICIANS),
    );

    Ok(Json(analysis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(confidence: Option<f64>, duration: Option<f64>) -> CreateAnalysisRequest {
        CreateAnalysisRequest {
            patient_id: Uuid::new_v4(),
            condition_detected: Condition::Cnv,
            confidence_score: confidence,
            severity: None,
            recommendations: None,
            consultation_duration: duration,
            model_version: None,
        }
    }

    #[test]
    fn confidence_must_be_a_probability() {
        assert!(validate(&request(Some(0.0), None)).is_ok());
        assert!(validate(&request(Some(1.0), None)).is_ok());
        assert!(validate(&request(Some(1.01), None)).is_err());
        assert!(validate(&request(Some(-0.1), None)).is_err());
    }

    #[test]
    fn duration_must_be_non_negative() {
        assert!(validate(&request(None, Some(120.0))).is_ok());
        assert!(validate(&request(None, Some(-1.0))).is_err());
        assert!(validate(&request(None, Some(f64::NAN))).is_err());
    }
}
