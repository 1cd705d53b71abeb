//! Combines BloomFront, RevocationStore, and RevocationBus into the single
//! check/revoke surface `TokenGatewayPipeline` calls. Revocation checks
//! fail closed (a store timeout or error rejects the request); BloomFront
//! failures fail open (they only ever skip an optimization, never a check).

use crate::bloom_front::SharedBloomFront;
use crate::error::GatewayError;
use crate::models::RevocationScope;
use crate::revocation_bus::{RevocationBus, RevocationEvent};
use crate::revocation_store::RevocationStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub struct RevocationGuard {
    store: Arc<dyn RevocationStore>,
    bloom: SharedBloomFront,
    bus: Arc<dyn RevocationBus>,
    query_timeout: Duration,
    /// spec §6 `revocation.check-user-revocation`: when disabled, only
    /// per-jti revocation is consulted and user-level revocation is never
    /// queried, even though BloomFront can't express that half of the
    /// decision.
    check_user_revocation: bool,
    /// TTL applied to a `revoke_token`/`revoke_user` call that doesn't
    /// supply its own `expires_at`.
    default_ttl: chrono::Duration,
}

impl RevocationGuard {
    pub fn new(
        store: Arc<dyn RevocationStore>,
        bloom: SharedBloomFront,
        bus: Arc<dyn RevocationBus>,
        query_timeout: Duration,
        check_user_revocation: bool,
        default_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            bloom,
            bus,
            query_timeout,
            check_user_revocation,
            default_ttl,
        }
    }

    /// Returns `Ok(true)` if the token should be treated as revoked.
    pub async fn is_revoked(
        &self,
        jti: &str,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<bool, GatewayError> {
        // Fail-open: BloomFront can't say "definitely revoked", only
        // "definitely not" or "ask the store". A bloom that hasn't been
        // built yet just means every jti routes to the store.
        if !self.bloom.maybe_revoked(jti) {
            if !self.check_user_revocation {
                return Ok(false);
            }
            // Still must check user-level revocation — BloomFront only
            // tracks individual jtis, not subjects.
            return self.is_user_revoked(subject, issued_at).await;
        }

        let check = async {
            if self.store.is_token_revoked(jti).await.map_err(|e| {
                GatewayError::RevocationStoreError(e.to_string())
            })? {
                return Ok(true);
            }
            if !self.check_user_revocation {
                return Ok(false);
            }
            self.is_user_revoked(subject, issued_at).await
        };

        match tokio::time::timeout(self.query_timeout, check).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::RevocationTimeout(
                self.query_timeout.as_millis() as u64,
            )),
        }
    }

    async fn is_user_revoked(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<bool, GatewayError> {
        let revoked_at = self
            .store
            .user_revoked_at(subject)
            .await
            .map_err(|e| GatewayError::RevocationStoreError(e.to_string()))?;
        Ok(matches!(revoked_at, Some(t) if issued_at < t))
    }

    pub async fn revoke_token(
        &self,
        jti: &str,
        expires_at: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<(), GatewayError> {
        let expires_at = expires_at.unwrap_or_else(|| Utc::now() + self.default_ttl);
        self.store
            .revoke_token(jti, expires_at, reason)
            .await
            .map_err(|e| GatewayError::RevocationStoreError(e.to_string()))?;
        self.bloom.record(jti);
        let _ = self.bus.publish(RevocationEvent {
            scope: RevocationScope::Token {
                jti: jti.to_string(),
            },
        });
        Ok(())
    }

    pub async fn revoke_user(
        &self,
        subject: &str,
        issued_before: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<(), GatewayError> {
        let issued_before = issued_before.unwrap_or_else(Utc::now);
        let expires_at = expires_at.unwrap_or_else(|| Utc::now() + self.default_ttl);
        self.store
            .revoke_user(subject, issued_before, expires_at, reason)
            .await
            .map_err(|e| GatewayError::RevocationStoreError(e.to_string()))?;
        let _ = self.bus.publish(RevocationEvent {
            scope: RevocationScope::User {
                subject: subject.to_string(),
                issued_before,
            },
        });
        Ok(())
    }

    pub async fn rebuild_bloom(&self) -> Result<(), GatewayError> {
        self.bloom
            .rebuild(self.store.as_ref())
            .await
            .map_err(|e| GatewayError::RevocationStoreError(e.to_string()))
    }

    /// Ground-truth status check against the authoritative store, bypassing
    /// BloomFront — for the admin surface's "check JTI status" operation,
    /// which wants a direct answer rather than the fail-open fast path.
    pub async fn token_status(&self, jti: &str) -> Result<bool, GatewayError> {
        self.store
            .is_token_revoked(jti)
            .await
            .map_err(|e| GatewayError::RevocationStoreError(e.to_string()))
    }

    /// Subscribes to the underlying revocation bus — for the admin surface's
    /// "stream recent revocations" operation.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<crate::revocation_bus::RevocationEvent> {
        self.bus.subscribe()
    }
}
