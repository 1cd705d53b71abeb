//! Signing-key lifecycle, JWKS publishing/caching, and token
//! validation/issuance — the cryptographic core of the gateway.

pub mod issuer;
pub mod jwks;
pub mod jwks_cache;
pub mod key_store;
pub mod kms;
pub mod lifecycle;
pub mod validator;

pub use issuer::{TokenIssuanceParams, TokenIssuer, TokenIssuerError};
pub use jwks::{Jwk, JwksDocument, JwksError, JwksPublisher};
pub use jwks_cache::{HttpJwksFetcher, JwksCache, JwksCacheError, JwksFetcher};
pub use key_store::{
    expose_private_pem, InMemoryKeyStore, KeyStatus, KeyStore, KeyStoreError, SharedKeyStore,
    SigningKeyRecord,
};
pub use kms::{generate_rsa_keypair_pem, HsmKeyProvider, KeyProvider, SoftKeyProvider};
pub use lifecycle::{KeyLifecycleManager, KeyRotationPolicy, LifecycleError};
pub use validator::{ExternalClaims, TokenValidator, TokenValidatorError, ValidationOutcome};
