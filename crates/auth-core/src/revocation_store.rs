//! Durable revocation records (C9). Grounded on the teacher's
//! `auth-core::services::token_service::RevokedTokenStore` trait shape and
//! `auth-db::repositories::revoked_token_repository`'s MySQL-backed impl
//! (the SQL-backed counterpart lives in `auth-db`).

use crate::models::{RevocationEntry, RevocationScope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("storage backend error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Writing an entry whose `expires_at` is already in the past is a
    /// no-op: a revocation that would never be consulted shouldn't be
    /// persisted at all.
    async fn revoke_token(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<(), RevocationError>;
    /// Same no-op-on-expired rule as `revoke_token`. `issued_before` is the
    /// operator-supplied cutoff: a token issued before it is revoked, one
    /// issued at or after it is not.
    async fn revoke_user(
        &self,
        subject: &str,
        issued_before: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<(), RevocationError>;
    async fn is_token_revoked(&self, jti: &str) -> Result<bool, RevocationError>;
    /// `Some(t)` if every token for `subject` issued before `t` must be
    /// treated as revoked; `None` if the subject has no active user-level
    /// revocation on record (never written, or its `expires_at` has passed).
    async fn user_revoked_at(&self, subject: &str) -> Result<Option<DateTime<Utc>>, RevocationError>;
    /// Snapshot of every currently-revoked jti, used to rebuild `BloomFront`.
    async fn all_revoked_jtis(&self) -> Result<Vec<String>, RevocationError>;
    async fn count_active_revocations(&self) -> Result<u64, RevocationError>;
}

#[derive(Default)]
pub struct InMemoryRevocationStore {
    tokens: DashMap<String, RevocationEntry>,
    users: DashMap<String, RevocationEntry>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn revoke_token(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<(), RevocationError> {
        if expires_at <= Utc::now() {
            return Ok(());
        }
        self.tokens.insert(
            jti.to_string(),
            RevocationEntry {
                scope: RevocationScope::Token { jti: jti.to_string() },
                revoked_at: Utc::now(),
                expires_at,
                reason,
            },
        );
        Ok(())
    }

    async fn revoke_user(
        &self,
        subject: &str,
        issued_before: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<(), RevocationError> {
        if expires_at <= Utc::now() {
            return Ok(());
        }
        self.users.insert(
            subject.to_string(),
            RevocationEntry {
                scope: RevocationScope::User {
                    subject: subject.to_string(),
                    issued_before,
                },
                revoked_at: Utc::now(),
                expires_at,
                reason,
            },
        );
        Ok(())
    }

    async fn is_token_revoked(&self, jti: &str) -> Result<bool, RevocationError> {
        Ok(self
            .tokens
            .get(jti)
            .map(|e| e.expires_at > Utc::now())
            .unwrap_or(false))
    }

    async fn user_revoked_at(&self, subject: &str) -> Result<Option<DateTime<Utc>>, RevocationError> {
        Ok(self.users.get(subject).and_then(|entry| {
            if entry.expires_at <= Utc::now() {
                return None;
            }
            match &entry.scope {
                RevocationScope::User { issued_before, .. } => Some(*issued_before),
                RevocationScope::Token { .. } => None,
            }
        }))
    }

    async fn all_revoked_jtis(&self) -> Result<Vec<String>, RevocationError> {
        let now = Utc::now();
        Ok(self
            .tokens
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| e.key().clone())
            .collect())
    }

    async fn count_active_revocations(&self) -> Result<u64, RevocationError> {
        let now = Utc::now();
        let active_tokens = self.tokens.iter().filter(|e| e.expires_at > now).count();
        let active_users = self.users.iter().filter(|e| e.expires_at > now).count();
        Ok((active_tokens + active_users) as u64)
    }
}
