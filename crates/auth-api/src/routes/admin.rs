//! Admin revocation surface (spec §6): a deliberately thin router over
//! `RevocationGuard` — revoke by jti, revoke by full token (jti extracted
//! without signature verification, since revocation must work even for a
//! token whose signing key has since rotated out), revoke all of a user's
//! tokens, check a jti's ground-truth status, force a Bloom rebuild, and
//! stream recent revocation events over SSE. No auth is layered on these
//! routes beyond what `auth-api::middleware` already provides.

use crate::{error::ApiError, AppState};
use auth_core::GatewayError;
use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

#[derive(Debug, Deserialize)]
pub struct RevokeTokenBody {
    pub reason: Option<String>,
    /// Defaults to `RevocationGuard`'s configured TTL when omitted.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeFullTokenBody {
    pub token: String,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeUserBody {
    pub reason: Option<String>,
    /// Tokens for this subject issued before this instant are revoked;
    /// defaults to now when omitted.
    pub issued_before: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub jti: String,
    pub revoked: bool,
}

/// Pulls the `jti` claim out of a JWT's payload segment without verifying
/// its signature. Revocation must be effective even once the key that
/// signed this particular token has rotated out of the active set.
fn extract_jti(token: &str) -> Result<String, ApiError> {
    let payload_b64 = token
        .split('.')
        .nth(1)
        .ok_or_else(|| GatewayError::InvalidToken {
            reason: "token is not in three-part JWT form".to_string(),
        })?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| GatewayError::InvalidToken {
            reason: format!("payload segment is not valid base64url: {e}"),
        })?;
    let claims: Value = serde_json::from_slice(&payload_bytes).map_err(|e| {
        GatewayError::InvalidToken {
            reason: format!("payload segment is not valid JSON: {e}"),
        }
    })?;
    claims
        .get("jti")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            GatewayError::InvalidToken {
                reason: "token has no jti claim".to_string(),
            }
            .into()
        })
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Path(jti): Path<String>,
    Json(body): Json<RevokeTokenBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .revocation
        .revoke_token(&jti, body.expires_at, body.reason)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn revoke_full_token(
    State(state): State<AppState>,
    Json(body): Json<RevokeFullTokenBody>,
) -> Result<impl IntoResponse, ApiError> {
    let jti = extract_jti(&body.token)?;
    state
        .revocation
        .revoke_token(&jti, body.expires_at, body.reason)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn revoke_user(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(body): Json<RevokeUserBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .revocation
        .revoke_user(&subject, body.issued_before, body.expires_at, body.reason)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn token_status(
    State(state): State<AppState>,
    Path(jti): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let revoked = state.revocation.token_status(&jti).await?;
    Ok(Json(StatusResponse { jti, revoked }))
}

pub async fn rebuild_bloom(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.revocation.rebuild_bloom().await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn stream_revocations(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.revocation.subscribe_events();
    let stream = BroadcastStream::new(receiver).filter_map(|event| match event {
        Ok(event) => serde_json::to_string(&event)
            .ok()
            .map(|json| Ok(Event::default().data(json))),
        Err(_lagged) => None,
    });
    Sse::new(stream)
}
