//! Error kinds shared across the proxy, the analyzer engine, and the operator API.
//!
//! Mirrors the propagation rule from the design: the signals pipeline is
//! store-best-effort / forward-authoritative, so [`CrowdSieveError::StorageError`]
//! never surfaces on the signals response path — only on operator GET handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CrowdSieveError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for CrowdSieveError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CrowdSieveError::InvalidConfig(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            CrowdSieveError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            CrowdSieveError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            }
            CrowdSieveError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            CrowdSieveError::UpstreamTimeout(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            CrowdSieveError::UpstreamError(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            CrowdSieveError::StorageError(m) => {
                tracing::error!(error = %m, "storage error surfaced to caller");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage error".to_string())
            }
            CrowdSieveError::InternalError(m) => {
                tracing::error!(error = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CrowdSieveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_hides_details_from_body() {
        let err = CrowdSieveError::InternalError("leaked secret path".to_string());
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_input_maps_to_400() {
        let resp = CrowdSieveError::InvalidInput("bad batch".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let resp = CrowdSieveError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
