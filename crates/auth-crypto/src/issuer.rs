//! Mints short-lived downstream tokens signed by the gateway's own ACTIVE
//! key, carrying only the claims the translation layer decided to forward.

use crate::key_store::{expose_private_pem, KeyStoreError, SharedKeyStore};
use crate::validator::ExternalClaims;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenIssuerError {
    #[error("key store error: {0}")]
    Store(#[from] KeyStoreError),
    #[error("no usable signing key: {0}")]
    NoUsableKey(String),
    #[error("token encoding failed: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone)]
pub struct TokenIssuanceParams {
    pub issuer: String,
    pub audience: Option<String>,
    pub ttl_secs: i64,
    /// Claims allowed through from the translated claim set. Standard
    /// registered claims (`exp`/`iat`/`iss`/`sub`/`jti`/`aud`/`nbf`) are
    /// always owned by the issuer and never taken from this list.
    pub forwarded_claims: Vec<String>,
    /// `kid` to sign with if the key store somehow has no ACTIVE key.
    /// Exercised only in a degraded boot state; a healthy gateway never
    /// reaches this path because `KeyLifecycleManager::reconcile` runs
    /// before the listener accepts traffic.
    pub key_id_fallback: Option<String>,
}

const STANDARD_CLAIM_NAMES: [&str; 7] = ["exp", "iat", "iss", "sub", "jti", "aud", "nbf"];

pub struct TokenIssuer {
    store: SharedKeyStore,
}

impl TokenIssuer {
    pub fn new(store: SharedKeyStore) -> Self {
        Self { store }
    }

    pub async fn issue(
        &self,
        subject: &str,
        translated_claims: &Map<String, Value>,
        external: &ExternalClaims,
        params: &TokenIssuanceParams,
    ) -> Result<String, TokenIssuerError> {
        let active = match self.store.active().await? {
            Some(record) => record,
            None => {
                let fallback_kid = params.key_id_fallback.as_deref().ok_or_else(|| {
                    TokenIssuerError::NoUsableKey(
                        "no ACTIVE key and no key_id_fallback configured".to_string(),
                    )
                })?;
                self.store
                    .get(fallback_kid)
                    .await?
                    .ok_or_else(|| TokenIssuerError::NoUsableKey(fallback_kid.to_string()))?
            }
        };

        let now = Utc::now();
        let exp = now + chrono::Duration::seconds(params.ttl_secs);

        let mut claims = Map::new();
        claims.insert("sub".to_string(), Value::String(subject.to_string()));
        claims.insert("iss".to_string(), Value::String(params.issuer.clone()));
        claims.insert("iat".to_string(), Value::from(now.timestamp()));
        claims.insert("nbf".to_string(), Value::from(now.timestamp()));
        claims.insert("exp".to_string(), Value::from(exp.timestamp()));
        claims.insert("jti".to_string(), Value::String(Uuid::new_v4().to_string()));
        claims.insert(
            "original_iss".to_string(),
            Value::String(external.iss.clone()),
        );
        if let Some(audience) = &params.audience {
            claims.insert("aud".to_string(), Value::String(audience.clone()));
        }

        for key in &params.forwarded_claims {
            if STANDARD_CLAIM_NAMES.contains(&key.as_str()) {
                continue;
            }
            if let Some(value) = translated_claims.get(key) {
                claims.insert(key.clone(), value.clone());
            }
        }

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(active.kid.clone());

        let encoding_key = EncodingKey::from_rsa_pem(expose_private_pem(&active).as_bytes())?;
        let token = encode(&header, &claims, &encoding_key)?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_store::{InMemoryKeyStore, KeyStatus, KeyStore, SigningKeyRecord};
    use crate::kms::generate_rsa_keypair_pem;
    use std::sync::Arc;

    async fn store_with_active_key() -> SharedKeyStore {
        let store: SharedKeyStore = Arc::new(InMemoryKeyStore::new());
        let (priv_pem, pub_pem) = generate_rsa_keypair_pem().unwrap();
        let mut record = SigningKeyRecord::new_pending("k1".to_string(), priv_pem, pub_pem);
        record.status = KeyStatus::Active;
        store.create(record).await.unwrap();
        store
    }

    fn external_claims() -> ExternalClaims {
        let mut raw = Map::new();
        raw.insert("sub".to_string(), Value::String("user-1".to_string()));
        raw.insert(
            "iss".to_string(),
            Value::String("https://idp.example".to_string()),
        );
        ExternalClaims {
            sub: "user-1".to_string(),
            iss: "https://idp.example".to_string(),
            exp: 0,
            iat: 0,
            raw,
        }
    }

    #[tokio::test]
    async fn issues_a_token_signed_by_the_active_key() {
        let store = store_with_active_key().await;
        let issuer = TokenIssuer::new(store);
        let mut translated = Map::new();
        translated.insert(
            "roles".to_string(),
            Value::Array(vec![Value::String("admin".to_string())]),
        );

        let params = TokenIssuanceParams {
            issuer: "https://gateway.internal".to_string(),
            audience: Some("downstream".to_string()),
            ttl_secs: 600,
            forwarded_claims: vec!["roles".to_string()],
            key_id_fallback: None,
        };

        let token = issuer
            .issue("user-1", &translated, &external_claims(), &params)
            .await
            .unwrap();
        assert!(!token.is_empty());
        assert_eq!(token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn never_forwards_standard_claim_names_even_if_requested() {
        let store = store_with_active_key().await;
        let issuer = TokenIssuer::new(store.clone());
        let mut translated = Map::new();
        translated.insert(
            "iss".to_string(),
            Value::String("attacker-controlled".to_string()),
        );

        let params = TokenIssuanceParams {
            issuer: "https://gateway.internal".to_string(),
            audience: None,
            ttl_secs: 600,
            forwarded_claims: vec!["iss".to_string()],
            key_id_fallback: None,
        };

        let token = issuer
            .issue("user-1", &translated, &external_claims(), &params)
            .await
            .unwrap();

        let payload_segment = token.split('.').nth(1).unwrap();
        let payload_bytes =
            base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, payload_segment)
                .unwrap();
        let claims: Value = serde_json::from_slice(&payload_bytes).unwrap();
        assert_eq!(
            claims["iss"].as_str(),
            Some("https://gateway.internal"),
            "issuer must own iss, not the forwarded claim"
        );
    }

    #[tokio::test]
    async fn falls_back_to_configured_key_when_none_active() {
        let store: SharedKeyStore = Arc::new(InMemoryKeyStore::new());
        let (priv_pem, pub_pem) = generate_rsa_keypair_pem().unwrap();
        let record = SigningKeyRecord::new_pending("fallback".to_string(), priv_pem, pub_pem);
        store.create(record).await.unwrap();

        let issuer = TokenIssuer::new(store);
        let params = TokenIssuanceParams {
            issuer: "https://gateway.internal".to_string(),
            audience: None,
            ttl_secs: 600,
            forwarded_claims: vec![],
            key_id_fallback: Some("fallback".to_string()),
        };

        let token = issuer
            .issue("user-1", &Map::new(), &external_claims(), &params)
            .await
            .unwrap();
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn errors_when_no_active_key_and_no_fallback() {
        let store: SharedKeyStore = Arc::new(InMemoryKeyStore::new());
        let issuer = TokenIssuer::new(store);
        let params = TokenIssuanceParams {
            issuer: "https://gateway.internal".to_string(),
            audience: None,
            ttl_secs: 600,
            forwarded_claims: vec![],
            key_id_fallback: None,
        };

        let result = issuer
            .issue("user-1", &Map::new(), &external_claims(), &params)
            .await;
        assert!(matches!(result, Err(TokenIssuerError::NoUsableKey(_))));
    }
}
