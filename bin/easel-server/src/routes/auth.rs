//! Account sign-up and sign-in.
//!
//! Both return a fresh bearer token; `/auth/me` echoes the identity a token
//! resolves to.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::middleware::auth::{Caller, require_session};
use crate::schemas::auth::{
    AccountResponse, CallerIdentity, Credentials, MeResponse, SessionResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(register, login, me),
    components(schemas(
        Credentials,
        AccountResponse,
        SessionResponse,
        CallerIdentity,
        MeResponse
    ))
)]
pub struct AuthApi;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(me))
        .route_layer(middleware::from_fn_with_state(state, require_session))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

/// Username (trimmed) and password, both required.
fn credentials(body: Credentials) -> Result<(String, String), ServerError> {
    let username = body
        .username
        .map(|u| u.trim().to_owned())
        .filter(|u| !u.is_empty());
    let password = body.password.filter(|p| !p.is_empty());
    match (username, password) {
        (Some(username), Some(password)) => Ok((username, password)),
        _ => Err(ServerError::BadRequest("missing username or password".into())),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 200, description = "Account created and signed in", body = SessionResponse),
        (status = 400, description = "Missing fields or username taken"),
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<Json<SessionResponse>, ServerError> {
    let (username, password) = credentials(body)?;
    let account = state.users.register(&username, &password).await?;
    let token = state.sessions.issue(&account.username).await?;
    Ok(Json(SessionResponse {
        success: true,
        user: account.into(),
        token,
    }))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 400, description = "Missing fields or wrong username/password"),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<Json<SessionResponse>, ServerError> {
    let (username, password) = credentials(body)?;
    let account = state
        .users
        .authenticate(&username, &password)
        .await?
        .ok_or_else(|| ServerError::BadRequest("invalid username or password".into()))?;
    let token = state.sessions.issue(&account.username).await?;
    info!(username = %account.username, "signed in");
    Ok(Json(SessionResponse {
        success: true,
        user: account.into(),
        token,
    }))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Identity behind the bearer token", body = MeResponse),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn me(Extension(Caller(username)): Extension<Caller>) -> Json<MeResponse> {
    Json(MeResponse {
        success: true,
        user: CallerIdentity { username },
    })
}
