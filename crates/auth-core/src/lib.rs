//! Core gateway logic: claim translation, tiered config storage,
//! revocation, PKCE, and the per-request pipeline that ties the
//! `auth-crypto` key/token primitives together. Independent of HTTP or
//! database concerns — those live in `auth-api` and `auth-db`.

pub mod bloom_front;
pub mod config_store;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod pkce;
pub mod resilience;
pub mod revocation;
pub mod revocation_bus;
pub mod revocation_store;
pub mod role_catalog;
pub mod translation;

pub use error::GatewayError;
pub use pipeline::TokenGatewayPipeline;
