//! Analytics dashboard endpoints.
//!
//! All aggregates are computed on demand from the caller's scope:
//! - `GET /api/analytics/overview`: doctor/admin
//! - `GET /api/analytics/doctor[/:doctorId]`: any authenticated caller,
//!   access resolved by `check_doctor_access`
//! - `GET /api/analytics/ai-performance`: admin
//! - `POST /api/analytics/ai-performance`: admin, daily metrics upsert
//! - `GET /api/analytics/patients`: doctor/admin

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::analytics::{self, AiPerformance, DoctorAnalytics, Overview, PatientDemographics};
use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::api::types::{ApiContext, AuthUser};
use crate::authorization::{analytics_scope, check_doctor_access, AccessReason};
use crate::broadcast::{Audience, WsOutgoing};
use crate::db;
use crate::models::{ModelPerformance, PerformanceMetrics};

fn scope_for(auth: &AuthUser) -> Result<analytics::Scope, ApiError> {
    analytics_scope(&auth.caller())
        .ok_or_else(|| ApiError::Forbidden("analytics are limited to doctors and admins".into()))
}

/// `GET /api/analytics/overview`: behind `require_clinician`.
pub async fn overview(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Overview>, ApiError> {
    let scope = scope_for(&auth)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(analytics::overview(&conn, &scope, Utc::now())?))
}

/// `GET /api/analytics/doctor`: the caller's own dashboard.
pub async fn own_doctor(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DoctorAnalytics>, ApiError> {
    doctor_dashboard(&ctx, &auth, None)
}

/// `GET /api/analytics/doctor/:doctorId`
pub async fn doctor(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(doctor_id): Path<String>,
) -> Result<Json<DoctorAnalytics>, ApiError> {
    doctor_dashboard(&ctx, &auth, Some(&doctor_id))
}

fn doctor_dashboard(
    ctx: &ApiContext,
    auth: &AuthUser,
    requested: Option<&str>,
) -> Result<Json<DoctorAnalytics>, ApiError> {
    let conn = ctx.core.open_db()?;
    let access = check_doctor_access(&conn, &auth.caller(), requested).map_err(|e| {
        tracing::warn!(user_id = %auth.id, requested, error = %e, "Doctor dashboard denied");
        e
    })?;
    if access.reason == AccessReason::Administrator {
        tracing::info!(admin_id = %auth.id, doctor_id = %access.doctor.id, "Admin viewed doctor dashboard");
    }
    Ok(Json(analytics::doctor_analytics(&conn, &access.doctor, Utc::now())?))
}

/// `GET /api/analytics/ai-performance`: behind `require_admin`.
pub async fn ai_performance(
    State(ctx): State<ApiContext>,
) -> Result<Json<AiPerformance>, ApiError> {
    let conn = ctx.core.open_db()?;
    Ok(Json(analytics::ai_performance(&conn, Utc::now())?))
}

/// `GET /api/analytics/patients`: behind `require_clinician`.
pub async fn patients(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<PatientDemographics>, ApiError> {
    let scope = scope_for(&auth)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(analytics::patient_demographics(&conn, &scope, Utc::now())?))
}

// ═══════════════════════════════════════════════════════════
// Model-performance upsert
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct PerformanceUpsert {
    pub model_version: Option<String>,
    /// RFC 3339 timestamp or bare `YYYY-MM-DD`. Defaults to now.
    pub evaluation_date: Option<String>,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
}

/// UTC calendar day an evaluation belongs to.
pub fn evaluation_day(raw: Option<&str>, now: DateTime<Utc>) -> Result<NaiveDate, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(now.date_naive());
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc).date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!(
            "evaluation_date must be RFC 3339 or YYYY-MM-DD, got '{raw}'"
        ))
    })
}

fn validate_metrics(metrics: &PerformanceMetrics) -> Result<(), ApiError> {
    let ratios = [
        ("accuracy", metrics.accuracy),
        ("precision", metrics.precision),
        ("recall", metrics.recall),
        ("f1_score", metrics.f1_score),
    ];
    for (name, value) in ratios {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(ApiError::BadRequest(format!("{name} must be between 0 and 1")));
            }
        }
    }
    for (name, value) in [
        ("total_predictions", metrics.total_predictions),
        ("correct_predictions", metrics.correct_predictions),
    ] {
        if value.is_some_and(|v| v < 0) {
            return Err(ApiError::BadRequest(format!("{name} must not be negative")));
        }
    }
    Ok(())
}

/// `POST /api/analytics/ai-performance`: behind `require_admin`.
///
/// Upserts the `(model_version, day)` row and broadcasts the stored values
/// to every connected client.
pub async fn upsert_performance(
    State(ctx): State<ApiContext>,
    ApiJson(body): ApiJson<PerformanceUpsert>,
) -> Result<Json<ModelPerformance>, ApiError> {
    let model_version = body
        .model_version
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("model_version is required".into()))?
        .to_string();

    let now = Utc::now();
    let day = evaluation_day(body.evaluation_date.as_deref(), now)?;
    validate_metrics(&body.metrics)?;

    let stored = {
        let conn = ctx.core.open_db()?;
        db::upsert_performance(&conn, &model_version, day, &body.metrics, now)?
    };

    tracing::info!(%model_version, %day, "Model performance recorded");
    ctx.core.broadcast(
        WsOutgoing::AiPerformanceUpdated {
            performance: stored.clone(),
        },
        Audience::All,
    );

    Ok(Json(stored))
}
