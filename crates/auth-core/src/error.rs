//! The gateway's single error taxonomy (spec §7). Every component returns
//! one of these kinds; HTTP status mapping lives only in `auth-api`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request carried no bearer token at all — distinct from `InvalidToken`.
    #[error("no token present")]
    NoToken,

    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("jwks unavailable: {0}")]
    JwksUnavailable(String),

    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    #[error("illegal key status transition: {0}")]
    IllegalTransition(String),

    #[error("revocation check timed out after {0}ms")]
    RevocationTimeout(u64),

    #[error("revocation store error: {0}")]
    RevocationStoreError(String),

    #[error("translation config unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("revocation bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("translation schema load error: {0}")]
    SchemaLoadError(String),

    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::StorageUnavailable(err.to_string())
    }
}

impl From<auth_crypto::KeyStoreError> for GatewayError {
    fn from(err: auth_crypto::KeyStoreError) -> Self {
        match err {
            auth_crypto::KeyStoreError::NotFound(kid) => GatewayError::KeyNotFound(kid),
            auth_crypto::KeyStoreError::IllegalTransition { .. } => {
                GatewayError::IllegalTransition(err.to_string())
            }
            other => GatewayError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<auth_crypto::JwksCacheError> for GatewayError {
    fn from(err: auth_crypto::JwksCacheError) -> Self {
        GatewayError::JwksUnavailable(err.to_string())
    }
}

impl From<auth_crypto::TokenValidatorError> for GatewayError {
    fn from(err: auth_crypto::TokenValidatorError) -> Self {
        match err {
            auth_crypto::TokenValidatorError::JwksUnavailable(e) => {
                GatewayError::JwksUnavailable(e.to_string())
            }
        }
    }
}

impl From<auth_crypto::TokenIssuerError> for GatewayError {
    fn from(err: auth_crypto::TokenIssuerError) -> Self {
        match err {
            auth_crypto::TokenIssuerError::Store(e) => e.into(),
            other => GatewayError::KeyNotFound(other.to_string()),
        }
    }
}

impl From<auth_crypto::LifecycleError> for GatewayError {
    fn from(err: auth_crypto::LifecycleError) -> Self {
        match err {
            auth_crypto::LifecycleError::Store(e) => e.into(),
            other => GatewayError::IllegalTransition(other.to_string()),
        }
    }
}

impl From<auth_crypto::JwksError> for GatewayError {
    fn from(err: auth_crypto::JwksError) -> Self {
        match err {
            auth_crypto::JwksError::Store(e) => e.into(),
            other => GatewayError::KeyNotFound(other.to_string()),
        }
    }
}
