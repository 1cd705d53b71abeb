//! MySQL-backed persistence for signing keys, translation config versions,
//! revocations, and PKCE challenges. Each repository implements a port
//! defined in `auth-core`/`auth-crypto`; nothing here is consumed except
//! through those traits, so the gateway can run entirely on in-memory
//! stores in tests and swap in this crate only at bootstrap.

pub mod connection;
pub mod repositories;

pub use connection::*;
pub use repositories::*;
