//! `POST /auth/exchange` — the gateway's token-translation endpoint. Takes
//! the external bearer token via the `Authorization` header and a
//! `config_id` selecting which translation schema applies, and runs the
//! full `TokenGatewayPipeline` (validate -> revocation check -> translate
//! -> reissue). Returns the downstream token for the caller to attach as
//! its own `Authorization: Bearer` header when forwarding the request.

use crate::{error::ApiError, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub config_id: String,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub token: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExchangeRequest>,
) -> Result<(StatusCode, Json<ExchangeResponse>), ApiError> {
    let token = state
        .pipeline
        .process(bearer_token(&headers), &body.config_id)
        .await?;
    Ok((StatusCode::OK, Json(ExchangeResponse { token })))
}
