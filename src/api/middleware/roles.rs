//! Role gates.
//!
//! Applied with `route_layer` on route groups, inside `require_auth`. A
//! request whose `AuthUser` role is outside the group's set gets 403.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::AuthUser;
use crate::authorization::require_role;
use crate::broadcast::{ADMINS, CLINICIANS};
use crate::models::enums::Role;

pub async fn require_admin(req: Request<axum::body::Body>, next: Next) -> Response {
    gate(ADMINS, req, next).await
}

pub async fn require_clinician(req: Request<axum::body::Body>, next: Next) -> Response {
    gate(CLINICIANS, req, next).await
}

async fn gate(allowed: &[Role], req: Request<axum::body::Body>, next: Next) -> Response {
    let caller = match req.extensions().get::<AuthUser>() {
        Some(user) => user.caller(),
        None => return ApiError::Unauthorized.into_response(),
    };
    if let Err(e) = require_role(&caller, allowed) {
        tracing::warn!(user_id = %caller.id, role = %caller.role, "Role gate denied request");
        return ApiError::from(e).into_response();
    }
    next.run(req).await
}

pub async fn require_doctor(req: Request<axum::body::Body>, next: Next) -> Response {
    gate(&[Role::Doctor], req, next).await
}
