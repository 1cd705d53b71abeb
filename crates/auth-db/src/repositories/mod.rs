//! MySQL-backed counterparts to the in-memory stores defined as ports in
//! `auth-core`/`auth-crypto`. Each repository owns one table and binds
//! parameters positionally via `sqlx::query`, matching the teacher's
//! `revoked_token_repository` style rather than compile-time `query!`
//! macros (no database is available at build time for this workspace).

pub mod config_repository;
pub mod key_repository;
pub mod pkce_repository;
pub mod revocation_repository;

pub use config_repository::MySqlConfigStoreBackend;
pub use key_repository::MySqlKeyStore;
pub use pkce_repository::MySqlPkceStore;
pub use revocation_repository::MySqlRevocationStore;
