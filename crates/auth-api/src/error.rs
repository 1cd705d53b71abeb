//! Maps `GatewayError` onto HTTP status codes. Per spec §7, every failure
//! collapses to either 401 (the request itself can't be trusted) or 503
//! (something the gateway depends on is unavailable) — never a 4xx/5xx
//! split finer than that, and never inside `auth-core` itself.

use auth_core::GatewayError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

pub struct ApiError {
    pub inner: GatewayError,
    pub request_id: Option<Uuid>,
}

impl ApiError {
    pub fn new(inner: GatewayError) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.inner {
            GatewayError::NoToken => (StatusCode::UNAUTHORIZED, "NO_TOKEN"),
            GatewayError::InvalidToken { .. } => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            GatewayError::JwksUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "JWKS_UNAVAILABLE"),
            GatewayError::KeyNotFound(_) => (StatusCode::SERVICE_UNAVAILABLE, "KEY_NOT_FOUND"),
            GatewayError::IllegalTransition(_) => (StatusCode::SERVICE_UNAVAILABLE, "ILLEGAL_TRANSITION"),
            GatewayError::RevocationTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "REVOCATION_TIMEOUT"),
            GatewayError::RevocationStoreError(_) => (StatusCode::SERVICE_UNAVAILABLE, "REVOCATION_STORE_ERROR"),
            GatewayError::ConfigUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "CONFIG_UNAVAILABLE"),
            GatewayError::BusUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "BUS_UNAVAILABLE"),
            GatewayError::SchemaLoadError(_) => (StatusCode::SERVICE_UNAVAILABLE, "SCHEMA_LOAD_ERROR"),
            GatewayError::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
        };

        let body = ErrorResponse {
            code: code.to_string(),
            message: self.inner.to_string(),
            request_id: self.request_id.map(|id| id.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(inner: GatewayError) -> Self {
        ApiError::new(inner)
    }
}