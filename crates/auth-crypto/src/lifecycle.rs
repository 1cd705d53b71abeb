//! Drives signing keys through PENDING -> ACTIVE -> DEPRECATED -> RETIRED.
//!
//! Grounded in the teacher's sequential bootstrap (`main.rs`) for the
//! reconcile-before-serving step, and its `resilience::retry` shape for the
//! backoff policy on failed transitions.

use crate::key_store::{KeyStatus, KeyStoreError, SharedKeyStore, SigningKeyRecord};
use crate::kms::generate_rsa_keypair_pem;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("key store error: {0}")]
    Store(#[from] KeyStoreError),
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("exhausted {attempts} rotation attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

#[derive(Debug, Clone)]
pub struct KeyRotationPolicy {
    pub pending_grace_secs: i64,
    pub retention_secs: i64,
    pub archive_ttl_secs: i64,
    pub max_rotation_attempts: u32,
}

impl Default for KeyRotationPolicy {
    fn default() -> Self {
        Self {
            pending_grace_secs: 300,
            retention_secs: 24 * 3600,
            archive_ttl_secs: 7 * 24 * 3600,
            max_rotation_attempts: 5,
        }
    }
}

pub struct KeyLifecycleManager {
    store: SharedKeyStore,
    policy: KeyRotationPolicy,
}

impl KeyLifecycleManager {
    pub fn new(store: SharedKeyStore, policy: KeyRotationPolicy) -> Self {
        Self { store, policy }
    }

    /// Generates a fresh PENDING key and persists it. Does not activate it —
    /// activation waits for `pending_grace_secs` so the JWKS has propagated.
    async fn mint_pending(&self) -> Result<SigningKeyRecord, LifecycleError> {
        let (private_pem, public_pem) =
            generate_rsa_keypair_pem().map_err(|e| LifecycleError::Generation(e.to_string()))?;
        let record = SigningKeyRecord::new_pending(Uuid::new_v4().to_string(), private_pem, public_pem);
        self.store.create(record.clone()).await?;
        Ok(record)
    }

    async fn transition_with_retry(
        &self,
        kid: &str,
        from: KeyStatus,
        to: KeyStatus,
    ) -> Result<(), LifecycleError> {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(50);
        loop {
            attempt += 1;
            match self.store.transition(kid, from, to).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.policy.max_rotation_attempts => {
                    return Err(LifecycleError::RetriesExhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    })
                }
                Err(err) => {
                    tracing::warn!(kid, attempt, error = %err, "key transition failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    /// Same retry shape as `transition_with_retry`, but for the atomic
    /// deprecate-and-activate swap. Retrying the whole swap (rather than its
    /// two halves independently) means a transient failure can never leave
    /// the store with zero ACTIVE keys.
    async fn promote_with_retry(
        &self,
        new_active_kid: &str,
        previous_active_kid: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(50);
        loop {
            attempt += 1;
            match self.store.promote(new_active_kid, previous_active_kid).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= self.policy.max_rotation_attempts => {
                    return Err(LifecycleError::RetriesExhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    })
                }
                Err(err) => {
                    tracing::warn!(
                        new_active_kid,
                        ?previous_active_kid,
                        attempt,
                        error = %err,
                        "key promotion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    /// Ensures exactly one ACTIVE key exists. Run once at process bootstrap,
    /// before the HTTP listener is allowed to accept traffic.
    pub async fn reconcile(&self) -> Result<(), LifecycleError> {
        if self.store.active().await?.is_some() {
            return Ok(());
        }

        let pending = self.store.pending().await?;
        let candidate = if let Some(oldest) = pending.into_iter().min_by_key(|r| r.created_at) {
            oldest
        } else {
            tracing::info!("no ACTIVE or PENDING key found at boot, minting one");
            self.mint_pending().await?
        };

        self.transition_with_retry(&candidate.kid, KeyStatus::Pending, KeyStatus::Active)
            .await?;
        tracing::info!(kid = %candidate.kid, "promoted key to ACTIVE during reconcile");
        Ok(())
    }

    /// One rotation cycle: mint a new PENDING key, promote the oldest
    /// eligible PENDING key to ACTIVE (demoting the current ACTIVE key to
    /// DEPRECATED), retire DEPRECATED keys past their retention window, and
    /// purge RETIRED keys past their archive TTL.
    pub async fn rotate(&self) -> Result<(), LifecycleError> {
        self.mint_pending().await?;
        self.promote_eligible_pending().await?;
        self.retire_expired_deprecated().await?;
        self.purge_expired_retired().await?;
        Ok(())
    }

    async fn promote_eligible_pending(&self) -> Result<(), LifecycleError> {
        let now = Utc::now();
        let pending = self.store.pending().await?;
        let eligible = pending
            .into_iter()
            .filter(|r| (now - r.created_at).num_seconds() >= self.policy.pending_grace_secs)
            .min_by_key(|r| r.created_at);

        let Some(candidate) = eligible else {
            return Ok(());
        };

        let current_active = self.store.active().await?;
        self.promote_with_retry(&candidate.kid, current_active.as_ref().map(|r| r.kid.as_str()))
            .await?;
        tracing::info!(kid = %candidate.kid, "rotated in new ACTIVE key");
        Ok(())
    }

    async fn retire_expired_deprecated(&self) -> Result<(), LifecycleError> {
        let now = Utc::now();
        for record in self.store.deprecated().await? {
            let deprecated_since = record.deprecated_at.unwrap_or(record.created_at);
            if (now - deprecated_since).num_seconds() >= self.policy.retention_secs {
                self.transition_with_retry(&record.kid, KeyStatus::Deprecated, KeyStatus::Retired)
                    .await?;
                tracing::info!(kid = %record.kid, "retired key past retention window");
            }
        }
        Ok(())
    }

    async fn purge_expired_retired(&self) -> Result<(), LifecycleError> {
        let now = Utc::now();
        for record in self.store.retired().await? {
            let retired_since = record.retired_at.unwrap_or(record.created_at);
            if (now - retired_since).num_seconds() >= self.policy.archive_ttl_secs {
                self.store.purge(&record.kid).await?;
                tracing::info!(kid = %record.kid, "purged archived key");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_store::InMemoryKeyStore;
    use std::sync::Arc;

    fn manager_with_policy(policy: KeyRotationPolicy) -> KeyLifecycleManager {
        let store: SharedKeyStore = Arc::new(InMemoryKeyStore::new());
        KeyLifecycleManager::new(store, policy)
    }

    #[tokio::test]
    async fn reconcile_promotes_a_key_when_none_active() {
        let manager = manager_with_policy(KeyRotationPolicy::default());
        manager.reconcile().await.unwrap();
        let active = manager.store.active().await.unwrap();
        assert!(active.is_some());
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let manager = manager_with_policy(KeyRotationPolicy::default());
        manager.reconcile().await.unwrap();
        let first = manager.store.active().await.unwrap().unwrap().kid;
        manager.reconcile().await.unwrap();
        let second = manager.store.active().await.unwrap().unwrap().kid;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rotate_does_not_promote_before_grace_period_elapses() {
        let policy = KeyRotationPolicy {
            pending_grace_secs: 3600,
            ..Default::default()
        };
        let manager = manager_with_policy(policy);
        manager.reconcile().await.unwrap();
        let active_before = manager.store.active().await.unwrap().unwrap().kid;

        manager.rotate().await.unwrap();

        let active_after = manager.store.active().await.unwrap().unwrap().kid;
        assert_eq!(active_before, active_after, "grace period not yet elapsed");

        let pending = manager.store.pending().await.unwrap();
        assert_eq!(pending.len(), 1, "rotate() should have minted one new pending key");
    }

    #[tokio::test]
    async fn rotate_promotes_once_grace_period_elapses() {
        let policy = KeyRotationPolicy {
            pending_grace_secs: 0,
            ..Default::default()
        };
        let manager = manager_with_policy(policy);
        manager.reconcile().await.unwrap();
        let active_before = manager.store.active().await.unwrap().unwrap().kid;

        manager.rotate().await.unwrap();

        let active_after = manager.store.active().await.unwrap().unwrap().kid;
        assert_ne!(active_before, active_after);

        let deprecated = manager.store.deprecated().await.unwrap();
        assert!(deprecated.iter().any(|r| r.kid == active_before));
    }

    #[tokio::test]
    async fn exactly_one_active_key_holds_across_multiple_rotations() {
        let policy = KeyRotationPolicy {
            pending_grace_secs: 0,
            ..Default::default()
        };
        let manager = manager_with_policy(policy);
        manager.reconcile().await.unwrap();

        for _ in 0..5 {
            manager.rotate().await.unwrap();
            let all = manager.store.all().await.unwrap();
            let active_count = all.iter().filter(|r| r.status == KeyStatus::Active).count();
            assert_eq!(active_count, 1);
        }
    }

    #[tokio::test]
    async fn promotion_is_a_single_atomic_swap_not_two_independent_transitions() {
        let policy = KeyRotationPolicy {
            pending_grace_secs: 0,
            ..Default::default()
        };
        let manager = manager_with_policy(policy);
        manager.reconcile().await.unwrap();
        let active_before = manager.store.active().await.unwrap().unwrap().kid;

        manager.rotate().await.unwrap();

        // There is never a moment where the old ACTIVE key was demoted
        // without the new one having been promoted: the store always
        // reports exactly one ACTIVE key, and it's the new candidate.
        let all = manager.store.all().await.unwrap();
        let active: Vec<_> = all.iter().filter(|r| r.status == KeyStatus::Active).collect();
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].kid, active_before);
    }
}
