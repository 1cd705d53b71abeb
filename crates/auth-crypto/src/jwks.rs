//! Publishes the gateway's own signing keys as a JSON Web Key Set so
//! downstream services can verify tokens minted by `TokenIssuer`.

use crate::key_store::{KeyStoreError, SharedKeyStore};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rsa::pkcs8::DecodePublicKey;
use rsa::{RsaPublicKey, traits::PublicKeyParts};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("key store error: {0}")]
    Store(#[from] KeyStoreError),
    #[error("invalid public key material for kid {kid}: {reason}")]
    InvalidKey { kid: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub usage: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Strips RSA's DER big-endian encoding down to the unsigned, leading-zero
/// stripped form JWK's `n`/`e` fields expect, then base64url-encodes it.
fn encode_component(bytes: &[u8]) -> String {
    let mut trimmed = bytes;
    while trimmed.len() > 1 && trimmed[0] == 0 {
        trimmed = &trimmed[1..];
    }
    URL_SAFE_NO_PAD.encode(trimmed)
}

pub fn jwk_from_public_key_pem(kid: &str, public_key_pem: &str) -> Result<Jwk, JwksError> {
    let public_key =
        RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|e| JwksError::InvalidKey {
            kid: kid.to_string(),
            reason: e.to_string(),
        })?;

    Ok(Jwk {
        kty: "RSA".to_string(),
        kid: kid.to_string(),
        usage: "sig".to_string(),
        alg: "RS256".to_string(),
        n: encode_component(&public_key.n().to_bytes_be()),
        e: encode_component(&public_key.e().to_bytes_be()),
    })
}

/// Renders the current publishable key set (ACTIVE + DEPRECATED) from
/// `KeyStore`. Stateless by design — callers cache the rendered document
/// behind the `jwks_public_ttl_secs` max-age from config.
pub struct JwksPublisher {
    store: SharedKeyStore,
}

impl JwksPublisher {
    pub fn new(store: SharedKeyStore) -> Self {
        Self { store }
    }

    pub async fn publish(&self) -> Result<JwksDocument, JwksError> {
        let records = self.store.publishable().await?;
        let keys = records
            .iter()
            .map(|r| jwk_from_public_key_pem(&r.kid, &r.public_key_pem))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(JwksDocument { keys })
    }
}
