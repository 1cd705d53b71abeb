//! `GET /auth/.well-known/jwks.json` — the gateway's own published key set
//! (ACTIVE + DEPRECATED), so downstream services can verify tokens minted
//! by `TokenIssuer`. Cached for `jwks_public_ttl_secs` per spec §6.

use crate::{error::ApiError, AppState};
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};

pub async fn get_jwks(State(state): State<AppState>) -> Result<Response, ApiError> {
    let document = state.jwks_publisher.publish().await?;
    let max_age = state.jwks_public_ttl.as_secs();
    Ok((
        [(
            header::CACHE_CONTROL,
            format!("public, max-age={max_age}"),
        )],
        Json(document),
    )
        .into_response())
}
