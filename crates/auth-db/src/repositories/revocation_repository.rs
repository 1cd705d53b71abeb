//! `revocations` table, keyed the way spec.md's persisted-state layout
//! describes it: `revoked:jti:<jti>` and `revoked:user:<userId>` rows in one
//! table distinguished by a `scope` column, each carrying its own
//! caller-supplied TTL via `expires_at`. Grounded on the teacher's
//! `revoked_token_repository` (raw `sqlx::query` + manual `Row::try_get`,
//! no compile-time macros).

use async_trait::async_trait;
use auth_core::revocation_store::{RevocationError, RevocationStore};
use chrono::{DateTime, Utc};
use sqlx::{MySql, Pool, Row};

pub struct MySqlRevocationStore {
    pool: Pool<MySql>,
}

impl MySqlRevocationStore {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    fn jti_key(jti: &str) -> String {
        format!("revoked:jti:{jti}")
    }

    fn user_key(subject: &str) -> String {
        format!("revoked:user:{subject}")
    }
}

#[async_trait]
impl RevocationStore for MySqlRevocationStore {
    async fn revoke_token(
        &self,
        jti: &str,
        expires_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<(), RevocationError> {
        if expires_at <= Utc::now() {
            return Ok(());
        }
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO revocations (revocation_key, scope, revoked_at, reason, expires_at)
            VALUES (?, 'token', ?, ?, ?)
            ON DUPLICATE KEY UPDATE expires_at = VALUES(expires_at), reason = VALUES(reason)
            "#,
        )
        .bind(Self::jti_key(jti))
        .bind(now)
        .bind(&reason)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RevocationError::Storage(e.to_string()))?;
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
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO revocations (revocation_key, scope, revoked_at, reason, expires_at, issued_before)
            VALUES (?, 'user', ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                revoked_at = VALUES(revoked_at),
                expires_at = VALUES(expires_at),
                issued_before = VALUES(issued_before),
                reason = VALUES(reason)
            "#,
        )
        .bind(Self::user_key(subject))
        .bind(now)
        .bind(&reason)
        .bind(expires_at)
        .bind(issued_before)
        .execute(&self.pool)
        .await
        .map_err(|e| RevocationError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn is_token_revoked(&self, jti: &str) -> Result<bool, RevocationError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM revocations WHERE revocation_key = ? AND expires_at > ?",
        )
        .bind(Self::jti_key(jti))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RevocationError::Storage(e.to_string()))?
        .try_get("count")
        .map_err(|e| RevocationError::Storage(e.to_string()))?;
        Ok(count > 0)
    }

    async fn user_revoked_at(&self, subject: &str) -> Result<Option<DateTime<Utc>>, RevocationError> {
        let row = sqlx::query(
            "SELECT issued_before FROM revocations WHERE revocation_key = ? AND expires_at > ?",
        )
        .bind(Self::user_key(subject))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RevocationError::Storage(e.to_string()))?;

        row.map(|r| r.try_get("issued_before").map_err(|e| RevocationError::Storage(e.to_string())))
            .transpose()
    }

    async fn all_revoked_jtis(&self) -> Result<Vec<String>, RevocationError> {
        let rows = sqlx::query(
            "SELECT revocation_key FROM revocations WHERE scope = 'token' AND expires_at > ?",
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RevocationError::Storage(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let key: String = r.try_get("revocation_key").map_err(|e| RevocationError::Storage(e.to_string()))?;
                Ok(key.trim_start_matches("revoked:jti:").to_string())
            })
            .collect()
    }

    async fn count_active_revocations(&self) -> Result<u64, RevocationError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM revocations WHERE expires_at > ?")
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RevocationError::Storage(e.to_string()))?
            .try_get("count")
            .map_err(|e| RevocationError::Storage(e.to_string()))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_match_spec_layout() {
        assert_eq!(MySqlRevocationStore::jti_key("abc"), "revoked:jti:abc");
        assert_eq!(MySqlRevocationStore::user_key("user-1"), "revoked:user:user-1");
    }

    #[test]
    fn all_revoked_jtis_strips_the_key_prefix() {
        let key = MySqlRevocationStore::jti_key("ext-jti-1");
        assert_eq!(key.trim_start_matches("revoked:jti:"), "ext-jti-1");
    }
}
