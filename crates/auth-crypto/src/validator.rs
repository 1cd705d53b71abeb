//! Validates inbound tokens issued by the external IdP against its
//! published JWKS. Three-way outcome matches spec: a request can arrive
//! with no token at all, a token is explicitly not absence.

use crate::jwks::Jwk;
use crate::jwks_cache::{JwksCache, JwksCacheError};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenValidatorError {
    #[error("jwks unavailable: {0}")]
    JwksUnavailable(#[from] JwksCacheError),
}

#[derive(Debug, Clone)]
pub struct ExternalClaims {
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    /// All claims as received, including `sub`/`iss`/`exp`/`iat` — kept so
    /// `ClaimTranslator` can read arbitrary IdP-specific fields.
    pub raw: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid(ExternalClaims),
    Invalid { reason: String },
    NoToken,
}

pub struct TokenValidator {
    jwks_cache: Arc<JwksCache>,
    expected_issuer: Option<String>,
    /// Clock skew tolerance, per spec: accept tokens up to this many seconds
    /// early/late relative to `exp`/`iat`.
    skew_tolerance_secs: u64,
}

impl TokenValidator {
    pub fn new(
        jwks_cache: Arc<JwksCache>,
        expected_issuer: Option<String>,
        skew_tolerance_secs: u64,
    ) -> Self {
        Self {
            jwks_cache,
            expected_issuer,
            skew_tolerance_secs,
        }
    }

    pub async fn validate(
        &self,
        token: Option<&str>,
    ) -> Result<ValidationOutcome, TokenValidatorError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(ValidationOutcome::NoToken);
        };

        let header = match decode_header(token) {
            Ok(h) => h,
            Err(e) => {
                return Ok(ValidationOutcome::Invalid {
                    reason: format!("malformed header: {e}"),
                })
            }
        };

        let Some(kid) = header.kid else {
            return Ok(ValidationOutcome::Invalid {
                reason: "token header missing kid".to_string(),
            });
        };

        let Some(jwk) = self.jwks_cache.get_key(&kid).await? else {
            return Ok(ValidationOutcome::Invalid {
                reason: format!("no matching key for kid {kid}"),
            });
        };

        let decoding_key = match decoding_key_from_jwk(&jwk) {
            Ok(k) => k,
            Err(e) => {
                return Ok(ValidationOutcome::Invalid {
                    reason: format!("unusable key material: {e}"),
                })
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.skew_tolerance_secs;
        if let Some(issuer) = &self.expected_issuer {
            validation.set_issuer(&[issuer]);
        }
        validation.validate_exp = true;
        validation.required_spec_claims = ["exp".to_string()].into();

        match decode::<Map<String, Value>>(token, &decoding_key, &validation) {
            Ok(data) => Ok(parse_claims(data.claims)),
            Err(e) => Ok(ValidationOutcome::Invalid {
                reason: e.to_string(),
            }),
        }
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
    DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
}

fn parse_claims(raw: Map<String, Value>) -> ValidationOutcome {
    let sub = raw.get("sub").and_then(Value::as_str).unwrap_or("").to_string();
    let iss = raw.get("iss").and_then(Value::as_str).unwrap_or("").to_string();
    let exp = raw.get("exp").and_then(Value::as_i64).unwrap_or(0);
    let iat = raw.get("iat").and_then(Value::as_i64).unwrap_or(0);

    if sub.is_empty() {
        return ValidationOutcome::Invalid {
            reason: "token missing sub claim".to_string(),
        };
    }

    ValidationOutcome::Valid(ExternalClaims { sub, iss, exp, iat, raw })
}

impl ExternalClaims {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn as_string_map(&self) -> HashMap<String, Value> {
        self.raw.clone().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_token_is_no_token_not_invalid() {
        let jwks_cache = Arc::new(JwksCache::new(
            Arc::new(crate::jwks_cache::HttpJwksFetcher::default()),
            "https://idp.example/jwks".to_string(),
            std::time::Duration::from_secs(300),
            std::time::Duration::from_secs(300),
        ));
        let validator = TokenValidator::new(jwks_cache, None, 30);
        let outcome = validator.validate(None).await.unwrap();
        assert!(matches!(outcome, ValidationOutcome::NoToken));
    }

    #[tokio::test]
    async fn empty_string_token_is_no_token() {
        let jwks_cache = Arc::new(JwksCache::new(
            Arc::new(crate::jwks_cache::HttpJwksFetcher::default()),
            "https://idp.example/jwks".to_string(),
            std::time::Duration::from_secs(300),
            std::time::Duration::from_secs(300),
        ));
        let validator = TokenValidator::new(jwks_cache, None, 30);
        let outcome = validator.validate(Some("")).await.unwrap();
        assert!(matches!(outcome, ValidationOutcome::NoToken));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_not_no_token() {
        let jwks_cache = Arc::new(JwksCache::new(
            Arc::new(crate::jwks_cache::HttpJwksFetcher::default()),
            "https://idp.example/jwks".to_string(),
            std::time::Duration::from_secs(300),
            std::time::Duration::from_secs(300),
        ));
        let validator = TokenValidator::new(jwks_cache, None, 30);
        let outcome = validator.validate(Some("not-a-jwt")).await.unwrap();
        assert!(matches!(outcome, ValidationOutcome::Invalid { .. }));
    }
}
