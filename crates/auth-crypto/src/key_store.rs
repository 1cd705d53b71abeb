//! Signing-key persistence: the source of truth for every RSA keypair the
//! gateway has ever minted, and the sole place status transitions happen.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("illegal status transition for key {kid}: {from:?} -> {to:?}")]
    IllegalTransition {
        kid: String,
        from: KeyStatus,
        to: KeyStatus,
    },
    #[error("key {0} already exists")]
    AlreadyExists(String),
    #[error("storage backend error: {0}")]
    Storage(String),
}

/// Lifecycle states a signing key moves through; see `KeyLifecycleManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyStatus {
    /// Generated, published in JWKS, but not yet used to sign tokens.
    Pending,
    /// The single key `TokenIssuer` signs with.
    Active,
    /// No longer signs new tokens; still published so in-flight tokens verify.
    Deprecated,
    /// No longer published or trusted; retained only until `archive_ttl_secs`.
    Retired,
}

impl KeyStatus {
    fn allows(self, to: KeyStatus) -> bool {
        matches!(
            (self, to),
            (KeyStatus::Pending, KeyStatus::Active)
                | (KeyStatus::Active, KeyStatus::Deprecated)
                | (KeyStatus::Deprecated, KeyStatus::Retired)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub kid: String,
    pub status: KeyStatus,
    pub algorithm: String,
    #[serde(skip_serializing)]
    pub private_key_pem: Secret<String>,
    pub public_key_pem: String,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl SigningKeyRecord {
    pub fn new_pending(kid: String, private_key_pem: String, public_key_pem: String) -> Self {
        Self {
            kid,
            status: KeyStatus::Pending,
            algorithm: "RS256".to_string(),
            private_key_pem: Secret::new(private_key_pem),
            public_key_pem,
            created_at: Utc::now(),
            activated_at: None,
            deprecated_at: None,
            retired_at: None,
        }
    }
}

/// Durable store for signing keys. Status transitions are compare-and-set:
/// callers pass the status they believe is current, and the store rejects
/// the write (rather than clobbering) if another writer already moved on.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn create(&self, record: SigningKeyRecord) -> Result<(), KeyStoreError>;
    async fn get(&self, kid: &str) -> Result<Option<SigningKeyRecord>, KeyStoreError>;
    async fn active(&self) -> Result<Option<SigningKeyRecord>, KeyStoreError>;
    /// Keys a consumer may still verify against: ACTIVE + DEPRECATED.
    async fn publishable(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError>;
    async fn all(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError>;
    async fn pending(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError>;
    async fn deprecated(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError>;
    async fn retired(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError>;
    /// Compare-and-set transition. Fails with `IllegalTransition` if the
    /// record's current status does not equal `expected`.
    async fn transition(
        &self,
        kid: &str,
        expected: KeyStatus,
        to: KeyStatus,
    ) -> Result<(), KeyStoreError>;
    /// Atomically deprecates `previous_active_kid` (if any, and if still
    /// ACTIVE) and activates `new_active_kid` (if still PENDING) in one
    /// critical section. Never leaves the store with zero ACTIVE keys: if
    /// either half of the swap is illegal, neither happens.
    async fn promote(
        &self,
        new_active_kid: &str,
        previous_active_kid: Option<&str>,
    ) -> Result<(), KeyStoreError>;
    /// Physically remove a RETIRED key past its archive TTL.
    async fn purge(&self, kid: &str) -> Result<(), KeyStoreError>;
}

#[derive(Default)]
pub struct InMemoryKeyStore {
    records: DashMap<String, SigningKeyRecord>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn create(&self, record: SigningKeyRecord) -> Result<(), KeyStoreError> {
        if self.records.contains_key(&record.kid) {
            return Err(KeyStoreError::AlreadyExists(record.kid));
        }
        self.records.insert(record.kid.clone(), record);
        Ok(())
    }

    async fn get(&self, kid: &str) -> Result<Option<SigningKeyRecord>, KeyStoreError> {
        Ok(self.records.get(kid).map(|r| r.clone()))
    }

    async fn active(&self) -> Result<Option<SigningKeyRecord>, KeyStoreError> {
        Ok(self
            .records
            .iter()
            .find(|r| r.status == KeyStatus::Active)
            .map(|r| r.clone()))
    }

    async fn publishable(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| matches!(r.status, KeyStatus::Active | KeyStatus::Deprecated))
            .map(|r| r.clone())
            .collect())
    }

    async fn all(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        Ok(self.records.iter().map(|r| r.clone()).collect())
    }

    async fn pending(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == KeyStatus::Pending)
            .map(|r| r.clone())
            .collect())
    }

    async fn deprecated(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == KeyStatus::Deprecated)
            .map(|r| r.clone())
            .collect())
    }

    async fn retired(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == KeyStatus::Retired)
            .map(|r| r.clone())
            .collect())
    }

    async fn transition(
        &self,
        kid: &str,
        expected: KeyStatus,
        to: KeyStatus,
    ) -> Result<(), KeyStoreError> {
        if !expected.allows(to) {
            return Err(KeyStoreError::IllegalTransition {
                kid: kid.to_string(),
                from: expected,
                to,
            });
        }

        let mut entry = self
            .records
            .get_mut(kid)
            .ok_or_else(|| KeyStoreError::NotFound(kid.to_string()))?;

        if entry.status != expected {
            return Err(KeyStoreError::IllegalTransition {
                kid: kid.to_string(),
                from: entry.status,
                to,
            });
        }

        entry.status = to;
        let now = Utc::now();
        match to {
            KeyStatus::Active => entry.activated_at = Some(now),
            KeyStatus::Deprecated => entry.deprecated_at = Some(now),
            KeyStatus::Retired => entry.retired_at = Some(now),
            KeyStatus::Pending => {}
        }
        Ok(())
    }

    async fn promote(
        &self,
        new_active_kid: &str,
        previous_active_kid: Option<&str>,
    ) -> Result<(), KeyStoreError> {
        {
            let candidate = self
                .records
                .get(new_active_kid)
                .ok_or_else(|| KeyStoreError::NotFound(new_active_kid.to_string()))?;
            if candidate.status != KeyStatus::Pending {
                return Err(KeyStoreError::IllegalTransition {
                    kid: new_active_kid.to_string(),
                    from: candidate.status,
                    to: KeyStatus::Active,
                });
            }
        }
        if let Some(previous) = previous_active_kid {
            let current = self
                .records
                .get(previous)
                .ok_or_else(|| KeyStoreError::NotFound(previous.to_string()))?;
            if current.status != KeyStatus::Active {
                return Err(KeyStoreError::IllegalTransition {
                    kid: previous.to_string(),
                    from: current.status,
                    to: KeyStatus::Deprecated,
                });
            }
        }

        // Both halves are validated above; nothing below can fail, so a
        // reader can never observe the deprecation without the activation.
        let now = Utc::now();
        if let Some(previous) = previous_active_kid {
            let mut entry = self
                .records
                .get_mut(previous)
                .ok_or_else(|| KeyStoreError::NotFound(previous.to_string()))?;
            entry.status = KeyStatus::Deprecated;
            entry.deprecated_at = Some(now);
        }
        let mut entry = self
            .records
            .get_mut(new_active_kid)
            .ok_or_else(|| KeyStoreError::NotFound(new_active_kid.to_string()))?;
        entry.status = KeyStatus::Active;
        entry.activated_at = Some(now);
        Ok(())
    }

    async fn purge(&self, kid: &str) -> Result<(), KeyStoreError> {
        self.records
            .remove(kid)
            .ok_or_else(|| KeyStoreError::NotFound(kid.to_string()))?;
        Ok(())
    }
}

pub fn expose_private_pem(record: &SigningKeyRecord) -> &str {
    record.private_key_pem.expose_secret()
}

pub type SharedKeyStore = Arc<dyn KeyStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kid: &str) -> SigningKeyRecord {
        SigningKeyRecord::new_pending(kid.to_string(), "priv".to_string(), "pub".to_string())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();
        let got = store.get("k1").await.unwrap().unwrap();
        assert_eq!(got.status, KeyStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();
        assert!(matches!(
            store.create(sample("k1")).await,
            Err(KeyStoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();

        store
            .transition("k1", KeyStatus::Pending, KeyStatus::Active)
            .await
            .unwrap();

        // Repeating the same CAS now fails: the key is no longer Pending.
        let result = store
            .transition("k1", KeyStatus::Pending, KeyStatus::Active)
            .await;
        assert!(matches!(result, Err(KeyStoreError::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn illegal_transition_skips_a_state() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();
        let result = store
            .transition("k1", KeyStatus::Pending, KeyStatus::Retired)
            .await;
        assert!(matches!(result, Err(KeyStoreError::IllegalTransition { .. })));
    }

    #[tokio::test]
    async fn at_most_one_active_after_promotion() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();
        store.create(sample("k2")).await.unwrap();
        store
            .transition("k1", KeyStatus::Pending, KeyStatus::Active)
            .await
            .unwrap();

        let active = store.all().await.unwrap();
        let active_count = active.iter().filter(|r| r.status == KeyStatus::Active).count();
        assert_eq!(active_count, 1);
    }

    #[tokio::test]
    async fn promote_deprecates_previous_and_activates_candidate_together() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();
        store.create(sample("k2")).await.unwrap();
        store
            .transition("k1", KeyStatus::Pending, KeyStatus::Active)
            .await
            .unwrap();

        store.promote("k2", Some("k1")).await.unwrap();

        assert_eq!(store.get("k1").await.unwrap().unwrap().status, KeyStatus::Deprecated);
        assert_eq!(store.get("k2").await.unwrap().unwrap().status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn promote_rejects_a_candidate_that_is_not_pending() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();
        store.create(sample("k2")).await.unwrap();
        store
            .transition("k1", KeyStatus::Pending, KeyStatus::Active)
            .await
            .unwrap();
        // k2 is already Retired-ineligible for promotion: not Pending.
        store.records.get_mut("k2").unwrap().status = KeyStatus::Deprecated;

        let result = store.promote("k2", Some("k1")).await;
        assert!(matches!(result, Err(KeyStoreError::IllegalTransition { .. })));
        assert_eq!(store.get("k1").await.unwrap().unwrap().status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn promote_rejects_a_stale_previous_active_kid_leaving_both_keys_untouched() {
        let store = InMemoryKeyStore::new();
        store.create(sample("k1")).await.unwrap();
        store.create(sample("k2")).await.unwrap();
        store
            .transition("k1", KeyStatus::Pending, KeyStatus::Active)
            .await
            .unwrap();
        store
            .transition("k1", KeyStatus::Active, KeyStatus::Deprecated)
            .await
            .unwrap();

        let result = store.promote("k2", Some("k1")).await;
        assert!(matches!(result, Err(KeyStoreError::IllegalTransition { .. })));
        assert_eq!(store.get("k2").await.unwrap().unwrap().status, KeyStatus::Pending);
    }
}
