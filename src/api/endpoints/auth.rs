//! Account and session endpoints.
//!
//! `POST /api/auth/register`: Unprotected: create a doctor or patient account
//! `POST /api/auth/login`: Unprotected: exchange credentials for a JWT
//! `GET /api/auth/me`: Protected: the caller's profile
//! `POST /api/auth/ws-ticket`: Protected: one-time WebSocket upgrade ticket

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::api::types::{ApiContext, AuthUser, TicketHolder};
use crate::crypto::{hash_password, verify_password};
use crate::db;
use crate::models::enums::Role;
use crate::models::{NewUser, User};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub specialty: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    let email = req.email.trim();
    if email.len() < 3 || !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if req.role == Role::Admin {
        return Err(ApiError::Forbidden("admin accounts cannot self-register".into()));
    }
    Ok(())
}

/// PBKDF2 is deliberately slow; keep it off the async workers.
async fn hash_off_thread(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("hash task: {e}")))
}

/// `POST /api/auth/register`
pub async fn register(
    State(ctx): State<ApiContext>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    validate_registration(&request)?;

    let password_hash = hash_off_thread(request.password).await?;
    let new = NewUser {
        name: request.name.trim().to_string(),
        email: request.email.trim().to_string(),
        password_hash,
        role: request.role,
        specialty: request.specialty,
        department: request.department,
    };

    let now = Utc::now();
    let user = {
        let conn = ctx.core.open_db()?;
        db::insert_user(&conn, &new, now)?
    };
    let token = ctx.core.jwt().issue(user.id, user.role, &user.name, now)?;

    tracing::info!(user_id = %user.id, role = %user.role, "Account registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// `POST /api/auth/login`
///
/// Unknown email, wrong password and inactive account all answer 401 with
/// the same message.
pub async fn login(
    State(ctx): State<ApiContext>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = {
        let conn = ctx.core.open_db()?;
        db::get_user_by_email(&conn, &request.email)?
    };
    let user = user.ok_or(ApiError::Unauthorized)?;

    let stored = user.password_hash.clone();
    let password = request.password;
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| ApiError::Internal(format!("verify task: {e}")))??;

    if !matches || !user.is_active {
        tracing::warn!(user_id = %user.id, "Login rejected");
        return Err(ApiError::Unauthorized);
    }

    let token = ctx.core.jwt().issue(user.id, user.role, &user.name, Utc::now())?;
    tracing::info!(user_id = %user.id, "Login succeeded");
    Ok(Json(AuthResponse { token, user }))
}

/// `GET /api/auth/me`
pub async fn me(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<User>, ApiError> {
    let conn = ctx.core.open_db()?;
    let user = db::get_user(&conn, &auth.id)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(user))
}

// ═══════════════════════════════════════════════════════════
// WebSocket ticket endpoint
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct WsTicketResponse {
    pub ticket: String,
    pub expires_in: u32,
}

/// `POST /api/auth/ws-ticket`: Generate one-time WebSocket upgrade ticket.
///
/// Requires bearer auth. Returns a ticket valid for 30 seconds, used in the
/// WS upgrade query param instead of the JWT.
pub async fn ws_ticket(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<WsTicketResponse>, ApiError> {
    let ticket = {
        let mut tickets = ctx
            .ws_tickets
            .lock()
            .map_err(|_| ApiError::Internal("ticket lock".into()))?;
        tickets.issue(TicketHolder::from(&auth))
    };

    Ok(Json(WsTicketResponse {
        ticket,
        expires_in: 30,
    }))
}
