//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a `{"error": ...}` JSON
//! body with a matching status code.
//!
//! Store and internal errors are logged in full; clients only see a generic
//! message so file paths never leak.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::accounts::AccountError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Reading or writing a snapshot file failed.
    #[error("store error: {0}")]
    Store(#[from] easel_core::StoreError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or unknown session token.
    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AccountError> for ServerError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::UsernameTaken => ServerError::BadRequest(err.to_string()),
            AccountError::Store(e) => ServerError::Store(e),
            AccountError::Hashing(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, "not signed in".to_owned()),
            ServerError::Internal(detail) => {
                error!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Store(e) => {
                error!(error = %e, "store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_status() {
        let cases = [
            (ServerError::NotFound("task x not found".into()), StatusCode::NOT_FOUND),
            (ServerError::BadRequest("missing prompt".into()), StatusCode::BAD_REQUEST),
            (ServerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServerError::Internal("join failed".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn taken_username_is_a_client_error() {
        let err = ServerError::from(AccountError::UsernameTaken);
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
