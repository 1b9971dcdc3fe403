//! Audit logging middleware.
//!
//! Logs every API request with user id, method, path, and response status.
//! Runs inside auth so the user is known.

use std::time::Instant;

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::AuthUser;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let user = req
        .extensions()
        .get::<AuthUser>()
        .map(|u| (u.id.to_string(), u.role.as_str()));
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match user {
        Some((user_id, role)) => tracing::info!(
            target: "retinascope::audit",
            %method, %path, status, elapsed_ms, %user_id, role,
            "API access"
        ),
        None => tracing::info!(
            target: "retinascope::audit",
            %method, %path, status, elapsed_ms,
            "API access (anonymous)"
        ),
    }

    response
}
