//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <jwt>`, verifies it, confirms the account
//! still exists and is active, and injects `AuthUser` into request
//! extensions for downstream handlers.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db;

/// Require a valid bearer token.
///
/// Accesses `ApiContext` from request extensions (injected by Extension layer).
/// On success: injects `AuthUser` and adds `Cache-Control: no-store`.
pub async fn require_auth(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_auth_inner(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    // 1. Extract bearer token
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    // 2. Verify signature and expiry
    let claims = ctx.core.jwt().verify(&token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "Bearer token rejected");
        ApiError::Unauthorized
    })?;

    // 3. The account must still exist and be active
    let user = {
        let conn = ctx.core.open_db()?;
        db::get_user(&conn, &claims.sub)?
    };
    let user = match user {
        Some(user) if user.is_active => user,
        _ => {
            tracing::warn!(user_id = %claims.sub, "Token for missing or inactive account");
            return Err(ApiError::Unauthorized);
        }
    };

    let token_expires_at =
        DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(ApiError::Unauthorized)?;

    // 4. Inject user for downstream handlers. Role comes from the database
    //    so a role change takes effect without re-login.
    req.extensions_mut().insert(AuthUser {
        id: user.id,
        role: user.role,
        name: user.name,
        token_expires_at,
    });

    // 5. Process request
    let mut response = next.run(req).await;

    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));

    Ok(response)
}
