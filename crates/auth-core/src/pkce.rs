//! PkceStore (C12): holds PKCE challenges between the authorization step
//! and token issuance. Entries are one-time use — `consume` removes the
//! entry whether or not the verifier matches, so a leaked `state` can't be
//! replayed even against a failed first attempt.

use crate::models::PkceChallenge;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkceError {
    #[error("no challenge found for state {0}")]
    NotFound(String),
    #[error("challenge for state {0} has expired")]
    Expired(String),
    #[error("code verifier did not match the stored challenge")]
    VerifierMismatch,
    #[error("unsupported code_challenge_method: {0}")]
    UnsupportedMethod(String),
}

#[async_trait]
pub trait PkceStore: Send + Sync {
    async fn create(&self, state: String, code_challenge: String, method: String, ttl: std::time::Duration);
    /// Removes the entry unconditionally and returns whether `verifier`
    /// matches the stored challenge.
    async fn consume(&self, state: &str, verifier: &str) -> Result<(), PkceError>;
}

#[derive(Default)]
pub struct InMemoryPkceStore {
    challenges: DashMap<String, PkceChallenge>,
}

impl InMemoryPkceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PkceStore for InMemoryPkceStore {
    async fn create(&self, state: String, code_challenge: String, method: String, ttl: std::time::Duration) {
        let now = Utc::now();
        self.challenges.insert(
            state.clone(),
            PkceChallenge {
                state,
                code_challenge,
                code_challenge_method: method,
                created_at: now,
                expires_at: now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(300)),
            },
        );
    }

    async fn consume(&self, state: &str, verifier: &str) -> Result<(), PkceError> {
        let (_, challenge) = self
            .challenges
            .remove(state)
            .ok_or_else(|| PkceError::NotFound(state.to_string()))?;

        if Utc::now() > challenge.expires_at {
            return Err(PkceError::Expired(state.to_string()));
        }

        if challenge.code_challenge_method != "S256" {
            return Err(PkceError::UnsupportedMethod(challenge.code_challenge_method));
        }

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let computed = URL_SAFE_NO_PAD.encode(hasher.finalize());

        if computed == challenge.code_challenge {
            Ok(())
        } else {
            Err(PkceError::VerifierMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    #[tokio::test]
    async fn matching_verifier_succeeds() {
        let store = InMemoryPkceStore::new();
        let verifier = "correct-verifier";
        store
            .create(
                "state-1".to_string(),
                challenge_for(verifier),
                "S256".to_string(),
                Duration::from_secs(300),
            )
            .await;

        store.consume("state-1", verifier).await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_verifier_is_rejected() {
        let store = InMemoryPkceStore::new();
        store
            .create(
                "state-1".to_string(),
                challenge_for("correct-verifier"),
                "S256".to_string(),
                Duration::from_secs(300),
            )
            .await;

        let result = store.consume("state-1", "wrong-verifier").await;
        assert!(matches!(result, Err(PkceError::VerifierMismatch)));
    }

    #[tokio::test]
    async fn challenge_is_single_use() {
        let store = InMemoryPkceStore::new();
        let verifier = "correct-verifier";
        store
            .create(
                "state-1".to_string(),
                challenge_for(verifier),
                "S256".to_string(),
                Duration::from_secs(300),
            )
            .await;

        store.consume("state-1", verifier).await.unwrap();
        let second = store.consume("state-1", verifier).await;
        assert!(matches!(second, Err(PkceError::NotFound(_))));
    }

    #[tokio::test]
    async fn a_failed_attempt_still_consumes_the_challenge() {
        let store = InMemoryPkceStore::new();
        store
            .create(
                "state-1".to_string(),
                challenge_for("correct-verifier"),
                "S256".to_string(),
                Duration::from_secs(300),
            )
            .await;

        let _ = store.consume("state-1", "wrong-verifier").await;
        let retry = store.consume("state-1", "correct-verifier").await;
        assert!(matches!(retry, Err(PkceError::NotFound(_))));
    }

    #[tokio::test]
    async fn expired_challenge_is_rejected() {
        let store = InMemoryPkceStore::new();
        let verifier = "correct-verifier";
        store
            .create(
                "state-1".to_string(),
                challenge_for(verifier),
                "S256".to_string(),
                Duration::from_millis(1),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = store.consume("state-1", verifier).await;
        assert!(matches!(result, Err(PkceError::Expired(_))));
    }
}
