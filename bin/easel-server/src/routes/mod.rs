//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional OpenAPI document (disable with `EASEL_ENABLE_DOCS=false`)
//! - Health / heartbeat route
//! - `/api` routes for accounts, generation, tasks and the gallery
//! - Static serving of saved images under `/storage/images`

mod auth;
pub mod doc;
mod generate;
mod health;
mod images;
mod tasks;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Json, Router, middleware};
use easel_core::gallery::PUBLIC_IMAGE_PREFIX;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Request bodies may carry inline reference images.
const BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(auth::router(state.clone()))
        .merge(generate::router(state.clone()))
        .merge(tasks::router())
        .merge(images::router());

    let mut app = Router::new()
        .merge(health::router())
        .nest("/api", api_router)
        .nest_service(
            PUBLIC_IMAGE_PREFIX,
            ServeDir::new(state.gallery.images_dir()),
        );

    if state.config.enable_docs {
        let api_doc = doc::get_docs();
        app = app.route("/api-docs/openapi.json", get(move || async move { Json(api_doc) }));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::UserStore;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use easel_core::{GenerationRequest, TaskStatus};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const TOKEN: &str = "0123456789abcdef";

    async fn test_state(dir: &TempDir) -> Arc<AppState> {
        std::fs::write(
            dir.path().join("sessions.json"),
            json!({ TOKEN: { "username": "alice", "createdAt": 1_700_000_000_000_i64 } }).to_string(),
        )
        .unwrap();
        let config = Config {
            storage_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let mut state = AppState::initialize(config).await.unwrap();
        state.users = UserStore::with_rounds(state.config.users_path(), 2);
        Arc::new(state)
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn generate_request(token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post("/api/generate").header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_is_served_at_root() {
        let dir = TempDir::new().unwrap();
        let app = build(test_state(&dir).await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(trace::X_TRACE_ID));
    }

    #[tokio::test]
    async fn generate_requires_a_session() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let (status, body) = send(build(state.clone()), generate_request(None, json!({ "prompt": "cat" }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = send(
            build(state.clone()),
            generate_request(Some("unknown"), json!({ "prompt": "cat" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.tasks.is_empty().await);
    }

    #[tokio::test]
    async fn registered_token_reaches_protected_routes() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let (status, body) = send(
            build(state.clone()),
            json_post("/api/auth/register", json!({ "username": " carol ", "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["username"], "carol");
        assert!(body["user"]["id"].as_str().unwrap().starts_with("u_"));
        let token = body["token"].as_str().unwrap().to_owned();

        let me = Request::get("/api/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(build(state.clone()), me).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["username"], "carol");

        let (status, body) = send(
            build(state.clone()),
            generate_request(Some(&token), json!({ "prompt": "cat" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["username"], "carol");
    }

    #[tokio::test]
    async fn login_checks_the_password() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let register = || json_post("/api/auth/register", json!({ "username": "dave", "password": "pw" }));
        assert_eq!(send(build(state.clone()), register()).await.0, StatusCode::OK);

        let (status, body) = send(build(state.clone()), register()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "username already exists");

        let (status, body) = send(
            build(state.clone()),
            json_post("/api/auth/login", json!({ "username": "dave", "password": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid username or password");

        let (status, _) = send(
            build(state.clone()),
            json_post("/api/auth/login", json!({ "username": "dave" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            build(state.clone()),
            json_post("/api/auth/login", json!({ "username": "dave", "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap();
        assert_eq!(state.sessions.resolve(token).await.as_deref(), Some("dave"));
    }

    #[tokio::test]
    async fn me_requires_a_session() {
        let dir = TempDir::new().unwrap();
        let (status, _) = send(
            build(test_state(&dir).await),
            Request::get("/api/auth/me").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn generate_rejects_missing_prompt() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let (status, body) = send(
            build(state.clone()),
            generate_request(Some(TOKEN), json!({ "prompt": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing prompt");
        assert!(state.tasks.is_empty().await);
    }

    #[tokio::test]
    async fn generate_returns_task_immediately() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let (status, body) = send(
            build(state.clone()),
            generate_request(
                Some(TOKEN),
                json!({ "prompt": "cat", "aspectRatio": "1:1", "urls": ["https://ref/1"] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let task_id = body["taskId"].as_str().unwrap();
        assert_eq!(body["task"]["id"], task_id);
        assert_eq!(body["task"]["username"], "alice");
        assert_eq!(body["task"]["aspectRatio"], "1:1");
        assert_eq!(body["task"]["imageSize"], "1K");
        assert_eq!(body["task"]["hasReferenceImages"], true);
        assert_eq!(body["task"]["status"], "pending");
        assert!(state.tasks.get(task_id).await.is_some());
    }

    #[tokio::test]
    async fn task_routes_cover_lookup_cancel_and_delete() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        state.tasks.create("task_a", "alice", GenerationRequest::new("a")).await;

        let (status, body) = send(build(state.clone()), Request::get("/api/tasks").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"].as_array().unwrap().len(), 1);

        let (status, _) = send(
            build(state.clone()),
            Request::get("/api/tasks/missing").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let cancel = || Request::post("/api/tasks/task_a/cancel").body(Body::empty()).unwrap();
        let (status, body) = send(build(state.clone()), cancel()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(state.tasks.get("task_a").await.unwrap().status, TaskStatus::Cancelled);

        let (status, _) = send(build(state.clone()), cancel()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let delete = || Request::delete("/api/tasks/task_a").body(Body::empty()).unwrap();
        let (status, _) = send(build(state.clone()), delete()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(build(state.clone()), delete()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn image_routes_read_and_delete_gallery() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        state.gallery.write_image("orphan.png", b"png").await.unwrap();
        state.gallery.reconcile().await.unwrap();

        let (status, body) = send(build(state.clone()), Request::get("/api/images").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["images"][0]["url"], "/storage/images/orphan.png");

        let (status, body) = send(
            build(state.clone()),
            Request::get("/api/images/orphan").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image"]["prompt"], "(recovered)");

        let response = build(state.clone())
            .oneshot(Request::get("/storage/images/orphan.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, _) = send(
            build(state.clone()),
            Request::delete("/api/images/orphan").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!state.gallery.image_path("orphan.png").exists());

        let (status, _) = send(
            build(state.clone()),
            Request::get("/api/images/orphan").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_document_is_served_when_enabled() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(
            build(test_state(&dir).await),
            Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "easel-server");
    }
}
