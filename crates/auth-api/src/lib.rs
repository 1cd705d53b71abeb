//! HTTP surface for the gateway: the public JWKS endpoint, the token
//! exchange endpoint that drives `TokenGatewayPipeline`, and a thin admin
//! router over the revocation subsystem. No business logic lives here —
//! every handler is a few lines translating HTTP into a call on `auth-core`.

pub mod error;
pub mod middleware;
pub mod routes;

use auth_core::{revocation::RevocationGuard, TokenGatewayPipeline};
use auth_crypto::JwksPublisher;
use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TokenGatewayPipeline>,
    pub revocation: Arc<RevocationGuard>,
    pub jwks_publisher: Arc<JwksPublisher>,
    pub jwks_public_ttl: Duration,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/auth/.well-known/jwks.json", get(routes::jwks::get_jwks))
        .route("/auth/exchange", post(routes::exchange::exchange))
        .route("/admin/revocation/token/:jti", post(routes::admin::revoke_token))
        .route("/admin/revocation/full-token", post(routes::admin::revoke_full_token))
        .route("/admin/revocation/user/:subject", post(routes::admin::revoke_user))
        .route("/admin/revocation/token/:jti/status", get(routes::admin::token_status))
        .route("/admin/revocation/rebuild", post(routes::admin::rebuild_bloom))
        .route("/admin/revocation/stream", get(routes::admin::stream_revocations))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
