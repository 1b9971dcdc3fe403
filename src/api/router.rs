//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! REST routes are nested under `/api/`, the WebSocket upgrade lives at
//! `/ws/connect`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter → 2. Auth validator → 3. Audit logger → 4. Role gate

use std::sync::Arc;

use axum::middleware::from_fn;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

/// Build router from pre-constructed `ApiContext`.
///
/// Used by tests that need access to the shared `ApiContext`
/// (e.g. to issue WS tickets directly).
#[cfg(test)]
pub(crate) fn api_router_with_ctx(ctx: ApiContext) -> Router {
    build_router(ctx)
}

fn build_router(ctx: ApiContext) -> Router {
    // Protected routes. Role gates are `route_layer`s on individual method
    // routers so they run after auth and only for matched routes.
    //
    // Layers are applied from bottom (innermost) to top (outermost):
    //   Extension (outermost) → Rate limit → Auth → Audit (innermost) → Handler
    //
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let admin = || from_fn(middleware::roles::require_admin);
    let clinician = || from_fn(middleware::roles::require_clinician);
    let doctor = || from_fn(middleware::roles::require_doctor);

    let protected = Router::new()
        // Session
        .route("/auth/me", get(endpoints::auth::me))
        .route("/auth/ws-ticket", post(endpoints::auth::ws_ticket))
        // Records
        .route(
            "/patients",
            get(endpoints::patients::list)
                .merge(post(endpoints::patients::create).route_layer(clinician())),
        )
        .route("/patients/:id", get(endpoints::patients::detail))
        .route("/doctors", get(endpoints::doctors::list))
        .route(
            "/analysis",
            get(endpoints::analysis::list)
                .merge(post(endpoints::analysis::create).route_layer(doctor())),
        )
        .route("/analysis/:id", get(endpoints::analysis::detail))
        .route(
            "/analysis/:id/status",
            patch(endpoints::analysis::update_status).route_layer(clinician()),
        )
        // Analytics
        .route(
            "/analytics/overview",
            get(endpoints::analytics::overview).route_layer(clinician()),
        )
        .route("/analytics/doctor", get(endpoints::analytics::own_doctor))
        .route("/analytics/doctor/:doctorId", get(endpoints::analytics::doctor))
        .route(
            "/analytics/ai-performance",
            get(endpoints::analytics::ai_performance)
                .post(endpoints::analytics::upsert_performance)
                .route_layer(admin()),
        )
        .route(
            "/analytics/patients",
            get(endpoints::analytics::patients).route_layer(clinician()),
        )
        // Model training
        .route(
            "/model-training/start",
            post(endpoints::training::start).route_layer(admin()),
        )
        .route(
            "/model-training/status",
            get(endpoints::training::status).route_layer(admin()),
        )
        .route(
            "/model-training/stop",
            post(endpoints::training::stop).route_layer(admin()),
        )
        .with_state(ctx.clone())
        // Middleware stack (innermost first, outermost last):
        .layer(from_fn(middleware::audit::log_access))
        .layer(from_fn(middleware::auth::require_auth))
        .layer(from_fn(middleware::rate::limit))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    // Unprotected routes (rate-limited only, no auth required)
    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/auth/register", post(endpoints::auth::register))
        .route("/auth/login", post(endpoints::auth::login))
        .with_state(ctx.clone())
        .layer(from_fn(middleware::audit::log_access))
        .layer(from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // WebSocket upgrade route (ticket-based auth, rate-limited)
    let ws_routes = Router::new()
        .route("/ws/connect", get(websocket::ws_upgrade))
        .with_state(ctx.clone())
        .layer(from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx));

    Router::new()
        .nest("/api", protected)
        .nest("/api", unprotected)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::{json, Value};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::db::repository::fixtures::seed_user;
    use crate::models::enums::Role;
    use crate::models::User;

    struct TestApp {
        core: Arc<CoreState>,
        ctx: ApiContext,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let core = Arc::new(CoreState::for_tests(dir.path()));
            let ctx = ApiContext::new(core.clone());
            Self { core, ctx, _dir: dir }
        }

        /// Seed an account directly and return it with a valid token.
        fn user(&self, name: &str, role: Role) -> (User, String) {
            let conn = self.core.open_db().unwrap();
            let user = seed_user(&conn, name, role);
            let token = self
                .core
                .jwt()
                .issue(user.id, user.role, &user.name, Utc::now())
                .unwrap();
            (user, token)
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let response = self.raw(method, uri, token, body).await;
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, json)
        }

        async fn raw(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> axum::http::Response<Body> {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(t) = token {
                builder = builder.header("Authorization", format!("Bearer {t}"));
            }
            let body = match body {
                Some(value) => {
                    builder = builder.header("Content-Type", "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };
            api_router_with_ctx(self.ctx.clone())
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap()
        }

        async fn create_patient(&self, token: &str, name: &str) -> Value {
            let (status, patient) = self
                .send(
                    "POST",
                    "/api/patients",
                    Some(token),
                    Some(json!({"name": name, "date_of_birth": "1960-04-02", "gender": "female"})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{patient}");
            patient
        }

        async fn create_analysis(&self, token: &str, patient_id: &Value, condition: &str, confidence: f64) {
            let (status, body) = self
                .send(
                    "POST",
                    "/api/analysis",
                    Some(token),
                    Some(json!({
                        "patient_id": patient_id,
                        "condition_detected": condition,
                        "confidence_score": confidence,
                        "severity": "moderate",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
        }
    }

    // ── Auth and middleware ─────────────────────────────────

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], crate::config::APP_VERSION);
    }

    #[tokio::test]
    async fn malformed_input_gets_json_error_body() {
        let app = TestApp::new();
        let (_, doctor) = app.user("Dr. House", Role::Doctor);

        let request = Request::builder()
            .method("POST")
            .uri("/api/patients")
            .header("Authorization", format!("Bearer {doctor}"))
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = api_router_with_ctx(app.ctx.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).expect("error body should be JSON");
        assert!(body["error"].as_str().unwrap().contains("JSON"));

        let (status, body) = app
            .send(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"name": "X", "email": "x@example.org", "password": "long-enough", "role": "nurse"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = app.send("GET", "/api/analysis?limit=abc", Some(&doctor), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = app.send("GET", "/ws/connect", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn anonymous_rate_limit_is_per_peer() {
        use axum::extract::ConnectInfo;
        use std::net::SocketAddr;

        let app = TestApp::new();
        *app.ctx.rate_limiter.lock().unwrap() = crate::api::types::RateLimiter::with_limits(3, 1000);

        let from = |peer: &str, method: &str, uri: &str, body: Option<Value>| {
            let peer: SocketAddr = peer.parse().unwrap();
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .extension(ConnectInfo(peer));
            let body = match body {
                Some(value) => {
                    builder = builder.header("Content-Type", "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };
            builder.body(body).unwrap()
        };

        for _ in 0..3 {
            let response = api_router_with_ctx(app.ctx.clone())
                .oneshot(from("10.1.1.1:40000", "GET", "/api/health", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = api_router_with_ctx(app.ctx.clone())
            .oneshot(from("10.1.1.1:40001", "GET", "/api/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let login = json!({"email": "nobody@example.org", "password": "wrong-password"});
        let response = api_router_with_ctx(app.ctx.clone())
            .oneshot(from("10.2.2.2:40000", "POST", "/api/auth/login", Some(login)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let app = TestApp::new();
        for uri in ["/api/auth/me", "/api/patients", "/api/analytics/overview", "/api/doctors"] {
            let (status, body) = app.send("GET", uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["error"], "Authentication required");
        }
    }

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let app = TestApp::new();
        let (status, _) = app.send("GET", "/api/auth/me", Some("not.a.jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn inactive_account_token_returns_401() {
        let app = TestApp::new();
        let (user, token) = app.user("Dr Gone", Role::Doctor);
        app.core
            .open_db()
            .unwrap()
            .execute("UPDATE users SET is_active = 0 WHERE id = ?1", [user.id.to_string()])
            .unwrap();

        let (status, _) = app.send("GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_responses_are_not_cached() {
        let app = TestApp::new();
        let (_, token) = app.user("Dr Cache", Role::Doctor);
        let response = app.raw("GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = TestApp::new();
        let (status, _) = app.send("GET", "/api/nonexistent", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn register_login_me_flow() {
        let app = TestApp::new();
        let (status, body) = app
            .send(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "name": "Dr Ada",
                    "email": "Ada@Clinic.org",
                    "password": "correct-horse",
                    "role": "doctor",
                    "specialty": "Retina",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert!(body["token"].as_str().is_some());
        assert!(body["user"].get("password_hash").is_none());

        // Email match is case-insensitive
        let (status, body) = app
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"email": "ada@clinic.org", "password": "correct-horse"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, me) = app.send("GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["name"], "Dr Ada");
        assert_eq!(me["role"], "doctor");
        assert_eq!(me["specialty"], "Retina");

        let (status, _) = app
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"email": "ada@clinic.org", "password": "wrong-horse"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_rejects_admin_and_duplicates() {
        let app = TestApp::new();
        let body = |role: &str| {
            json!({"name": "X", "email": "x@y.org", "password": "long-enough", "role": role})
        };

        let (status, _) = app.send("POST", "/api/auth/register", None, Some(body("admin"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.send("POST", "/api/auth/register", None, Some(body("patient"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = app.send("POST", "/api/auth/register", None, Some(body("patient"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn ws_ticket_issued_with_auth() {
        let app = TestApp::new();
        let (status, _) = app.send("POST", "/api/auth/ws-ticket", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, token) = app.user("Dr Ws", Role::Doctor);
        let (status, body) = app.send("POST", "/api/auth/ws-ticket", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["ticket"].as_str().unwrap().is_empty());
        assert_eq!(body["expires_in"], 30);
    }

    // ── Records ─────────────────────────────────────────────

    #[tokio::test]
    async fn patients_are_scoped_to_their_doctor() {
        let app = TestApp::new();
        let (_, a) = app.user("Dr A", Role::Doctor);
        let (_, b) = app.user("Dr B", Role::Doctor);
        let (_, admin) = app.user("Root", Role::Admin);

        let pa = app.create_patient(&a, "Alice").await;
        app.create_patient(&b, "Bob").await;

        let (_, list) = app.send("GET", "/api/patients", Some(&a), None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["name"], "Alice");

        let (_, list) = app.send("GET", "/api/patients", Some(&admin), None).await;
        assert_eq!(list.as_array().unwrap().len(), 2);

        let uri = format!("/api/patients/{}", pa["id"].as_str().unwrap());
        let (status, _) = app.send("GET", &uri, Some(&b), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.send("GET", &uri, Some(&a), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn patient_role_cannot_create_records() {
        let app = TestApp::new();
        let (_, patient) = app.user("Pat", Role::Patient);
        let (status, _) = app
            .send("POST", "/api/patients", Some(&patient), Some(json!({"name": "Me"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_must_name_an_existing_doctor() {
        let app = TestApp::new();
        let (_, admin) = app.user("Root", Role::Admin);
        let (doctor, _) = app.user("Dr A", Role::Doctor);

        let (status, _) = app
            .send("POST", "/api/patients", Some(&admin), Some(json!({"name": "P"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(
                "POST",
                "/api/patients",
                Some(&admin),
                Some(json!({"name": "P", "doctor_id": uuid::Uuid::new_v4()})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .send(
                "POST",
                "/api/patients",
                Some(&admin),
                Some(json!({"name": "P", "doctor_id": doctor.id})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["doctor_id"], doctor.id.to_string());
    }

    #[tokio::test]
    async fn doctors_listing_counts_patients() {
        let app = TestApp::new();
        let (_, a) = app.user("Dr A", Role::Doctor);
        app.create_patient(&a, "One").await;
        app.create_patient(&a, "Two").await;
        let (_, patient) = app.user("Pat", Role::Patient);

        let (status, doctors) = app.send("GET", "/api/doctors", Some(&patient), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(doctors[0]["name"], "Dr A");
        assert_eq!(doctors[0]["patient_count"], 2);
    }

    #[tokio::test]
    async fn analysis_requires_visible_patient() {
        let app = TestApp::new();
        let (_, a) = app.user("Dr A", Role::Doctor);
        let (_, b) = app.user("Dr B", Role::Doctor);
        let (_, admin) = app.user("Root", Role::Admin);
        let pa = app.create_patient(&a, "Alice").await;

        let body = json!({"patient_id": pa["id"], "condition_detected": "CNV"});
        let (status, _) = app.send("POST", "/api/analysis", Some(&b), Some(body.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        // Only doctors record results
        let (status, _) = app.send("POST", "/api/analysis", Some(&admin), Some(body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .send(
                "POST",
                "/api/analysis",
                Some(&a),
                Some(json!({"patient_id": pa["id"], "condition_detected": "CNV", "confidence_score": 1.5})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analysis_status_update_and_listing() {
        let app = TestApp::new();
        let (_, a) = app.user("Dr A", Role::Doctor);
        let (_, b) = app.user("Dr B", Role::Doctor);
        let pa = app.create_patient(&a, "Alice").await;
        app.create_analysis(&a, &pa["id"], "DME", 0.8).await;

        let (_, list) = app.send("GET", "/api/analysis", Some(&a), None).await;
        let id = list[0]["id"].as_str().unwrap().to_string();
        assert_eq!(list[0]["status"], "completed");
        assert_eq!(list[0]["model_version"], "fusion-v1");

        let (_, other) = app.send("GET", "/api/analysis", Some(&b), None).await;
        assert!(other.as_array().unwrap().is_empty());

        let uri = format!("/api/analysis/{id}/status");
        let (status, _) = app
            .send("PATCH", &uri, Some(&b), Some(json!({"status": "reviewed"})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, updated) = app
            .send("PATCH", &uri, Some(&a), Some(json!({"status": "reviewed"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "reviewed");

        let (status, _) = app.send("GET", "/api/analysis/not-a-uuid", Some(&a), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ── Analytics ───────────────────────────────────────────

    #[tokio::test]
    async fn overview_matches_worked_example() {
        let app = TestApp::new();
        let (_, doctor) = app.user("Dr A", Role::Doctor);
        let patient = app.create_patient(&doctor, "Alice").await;
        app.create_analysis(&doctor, &patient["id"], "CNV", 0.95).await;
        app.create_analysis(&doctor, &patient["id"], "DME", 0.82).await;

        let (status, body) = app.send("GET", "/api/analytics/overview", Some(&doctor), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalAnalyses"], 2);
        assert_eq!(body["totalPatients"], 1);
        assert_eq!(body["averageConfidence"], "0.8850");
        let conditions = body["conditionDistribution"].as_array().unwrap();
        assert_eq!(conditions.len(), 2);
        assert!(conditions.iter().all(|c| c["count"] == 1));
        // Doctors never see the admin-only sections
        assert!(body.get("topDoctors").is_none());
        assert!(body.get("modelPerformance").is_none());
    }

    #[tokio::test]
    async fn admin_overview_includes_leaderboard_and_prediction_counts() {
        let app = TestApp::new();
        let (_, doctor) = app.user("Dr A", Role::Doctor);
        let (_, admin) = app.user("Root", Role::Admin);
        let patient = app.create_patient(&doctor, "Alice").await;
        app.create_analysis(&doctor, &patient["id"], "CNV", 0.95).await;
        app.create_analysis(&doctor, &patient["id"], "NORMAL", 0.6).await;

        let (status, body) = app.send("GET", "/api/analytics/overview", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["topDoctors"][0]["name"], "Dr A");
        assert_eq!(body["topDoctors"][0]["count"], 2);
        assert_eq!(body["modelPerformance"][0]["model_version"], "fusion-v1");
        assert_eq!(body["modelPerformance"][0]["total_predictions"], 2);
    }

    #[tokio::test]
    async fn patients_are_denied_clinician_analytics() {
        let app = TestApp::new();
        let (_, patient) = app.user("Pat", Role::Patient);
        for uri in [
            "/api/analytics/overview",
            "/api/analytics/patients",
            "/api/analytics/ai-performance",
            "/api/analytics/doctor",
            "/api/model-training/status",
        ] {
            let (status, _) = app.send("GET", uri, Some(&patient), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn doctor_dashboard_access_rules() {
        let app = TestApp::new();
        let (a_user, a) = app.user("Dr A", Role::Doctor);
        let (b_user, _) = app.user("Dr B", Role::Doctor);
        let (_, admin) = app.user("Root", Role::Admin);

        let (status, own) = app.send("GET", "/api/analytics/doctor", Some(&a), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(own["doctor"]["id"], a_user.id.to_string());

        let other = format!("/api/analytics/doctor/{}", b_user.id);
        let (status, _) = app.send("GET", &other, Some(&a), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let missing = format!("/api/analytics/doctor/{}", uuid::Uuid::new_v4());
        let (status, _) = app.send("GET", &missing, Some(&a), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.send("GET", "/api/analytics/doctor/xyz", Some(&a), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app.send("GET", &other, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["doctor"]["name"], "Dr B");
        assert_eq!(body["dailyAnalyses"].as_array().unwrap().len(), 0);
        assert_eq!(body["averageConfidence"], "0.0000");
    }

    #[tokio::test]
    async fn ai_performance_is_admin_only() {
        let app = TestApp::new();
        let (_, doctor) = app.user("Dr A", Role::Doctor);
        let (_, admin) = app.user("Root", Role::Admin);

        let (status, _) = app.send("GET", "/api/analytics/ai-performance", Some(&doctor), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app
            .send(
                "POST",
                "/api/analytics/ai-performance",
                Some(&doctor),
                Some(json!({"model_version": "v1"})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.send("GET", "/api/analytics/ai-performance", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["confidenceDistribution"]["high"], 0);
    }

    #[tokio::test]
    async fn performance_upsert_is_idempotent_per_day() {
        let app = TestApp::new();
        let (_, admin) = app.user("Root", Role::Admin);
        let upsert = |total: i64, accuracy: Option<f64>| {
            let mut body = json!({
                "model_version": "v2",
                "evaluation_date": "2026-10-01T09:00:00Z",
                "total_predictions": total,
            });
            if let Some(a) = accuracy {
                body["accuracy"] = json!(a);
            }
            body
        };

        let (status, first) = app
            .send("POST", "/api/analytics/ai-performance", Some(&admin), Some(upsert(10, Some(0.91))))
            .await;
        assert_eq!(status, StatusCode::OK, "{first}");
        let (status, second) = app
            .send("POST", "/api/analytics/ai-performance", Some(&admin), Some(upsert(25, None)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["id"], first["id"]);
        assert_eq!(second["total_predictions"], 25);
        // Omitted metric keeps its stored value
        assert_eq!(second["accuracy"], 0.91);

        let (_, body) = app.send("GET", "/api/analytics/ai-performance", Some(&admin), None).await;
        let rows = body["modelPerformance"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["evaluation_date"], "2026-10-01");
    }

    #[tokio::test]
    async fn performance_upsert_requires_model_version() {
        let app = TestApp::new();
        let (_, admin) = app.user("Root", Role::Admin);
        for body in [json!({}), json!({"model_version": "  "})] {
            let (status, err) = app
                .send("POST", "/api/analytics/ai-performance", Some(&admin), Some(body))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(err["error"], "model_version is required");
        }
    }

    #[tokio::test]
    async fn demographics_for_doctor() {
        let app = TestApp::new();
        let (_, doctor) = app.user("Dr A", Role::Doctor);
        app.create_patient(&doctor, "Alice").await;

        let (status, body) = app.send("GET", "/api/analytics/patients", Some(&doctor), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalPatients"], 1);
        assert_eq!(body["ageGroups"].as_array().unwrap().len(), 5);
        assert_eq!(body["genderDistribution"][0]["gender"], "female");
        assert_eq!(body["patientsWithAnalyses"], 0);
    }

    // ── Training ────────────────────────────────────────────

    #[tokio::test]
    async fn training_routes_are_admin_only() {
        let app = TestApp::new();
        let (_, doctor) = app.user("Dr A", Role::Doctor);
        let (status, _) = app
            .send("POST", "/api/model-training/start", Some(&doctor), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn training_status_stop_and_validation() {
        let app = TestApp::new();
        let (_, admin) = app.user("Root", Role::Admin);

        let (status, body) = app.send("GET", "/api/model-training/status", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");

        let (status, _) = app.send("POST", "/api/model-training/stop", Some(&admin), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = app
            .send("POST", "/api/model-training/start", Some(&admin), Some(json!({"epochs": 0})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(
                "POST",
                "/api/model-training/start",
                Some(&admin),
                Some(json!({"demo_mode": false})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
