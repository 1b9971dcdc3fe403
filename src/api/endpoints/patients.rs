//! Patient endpoints.
//!
//! - `GET /api/patients`: role-scoped list
//! - `POST /api/patients`: create (doctor/admin)
//! - `GET /api/patients/:id`: role-scoped detail

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::api::types::{ApiContext, AuthUser};
use crate::authorization::record_scope;
use crate::broadcast::{Audience, WsOutgoing, CLINICIANS};
use crate::db;
use crate::models::enums::{Gender, Role};
use crate::models::Patient;

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    /// Required for admins, ignored for doctors.
    pub doctor_id: Option<Uuid>,
    /// Patient login to link, if any.
    pub user_id: Option<Uuid>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub medical_history: Option<String>,
}

/// `GET /api/patients`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let patients = db::list_patients(&conn, &record_scope(&auth.caller()), None)?;
    Ok(Json(patients))
}

/// `GET /api/patients/:id`: 404 when missing or outside the caller's scope.
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(patient_id): Path<String>,
) -> Result<Json<Patient>, ApiError> {
    let id = Uuid::parse_str(&patient_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid patient ID: {e}")))?;

    let conn = ctx.core.open_db()?;
    db::get_patient_scoped(&conn, &id, &record_scope(&auth.caller()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))
}

/// `POST /api/patients`: behind `require_clinician`.
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }

    let conn = ctx.core.open_db()?;

    let doctor_id = match auth.role {
        Role::Doctor => auth.id,
        Role::Admin => {
            let id = request
                .doctor_id
                .ok_or_else(|| ApiError::BadRequest("doctor_id is required".into()))?;
            db::get_doctor(&conn, &id)?
                .ok_or_else(|| ApiError::NotFound("Doctor not found".into()))?
                .id
        }
        Role::Patient => return Err(ApiError::Forbidden("patients cannot create records".into())),
    };

    if let Some(user_id) = request.user_id {
        match db::get_user(&conn, &user_id)? {
            Some(user) if user.role == Role::Patient => {}
            _ => return Err(ApiError::BadRequest("user_id must name a patient account".into())),
        }
    }

    let patient = Patient {
        id: Uuid::new_v4(),
        user_id: request.user_id,
        doctor_id,
        name: name.to_string(),
        date_of_birth: request.date_of_birth,
        gender: request.gender,
        medical_history: request.medical_history,
        created_at: Utc::now(),
    };
    db::insert_patient(&conn, &patient)?;

    tracing::info!(patient_id = %patient.id, %doctor_id, "Patient created");
    ctx.core.broadcast(
        WsOutgoing::PatientCreated {
            patient: patient.clone(),
        },
        Audience::Roles(CLINICIANS),
    );

    Ok((StatusCode::CREATED, Json(patient)))
}
