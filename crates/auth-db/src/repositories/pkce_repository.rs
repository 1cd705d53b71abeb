//! `pkce_challenges` table, keyed `pkce:state:<state>` per spec.md's
//! persisted-state layout. `consume` removes the row unconditionally before
//! verifying, mirroring `auth_core::pkce::InMemoryPkceStore` so a leaked
//! `state` can't be replayed even against a failed first attempt.

use async_trait::async_trait;
use auth_core::pkce::{PkceError, PkceStore};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{MySql, Pool, Row};

pub struct MySqlPkceStore {
    pool: Pool<MySql>,
}

impl MySqlPkceStore {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    fn storage_key(state: &str) -> String {
        format!("pkce:state:{state}")
    }
}

#[async_trait]
impl PkceStore for MySqlPkceStore {
    async fn create(&self, state: String, code_challenge: String, method: String, ttl: std::time::Duration) {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(300));
        let _ = sqlx::query(
            r#"
            INSERT INTO pkce_challenges (
                storage_key, state, code_challenge, code_challenge_method, created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                code_challenge = VALUES(code_challenge),
                code_challenge_method = VALUES(code_challenge_method),
                created_at = VALUES(created_at),
                expires_at = VALUES(expires_at)
            "#,
        )
        .bind(Self::storage_key(&state))
        .bind(&state)
        .bind(code_challenge)
        .bind(method)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await;
    }

    async fn consume(&self, state: &str, verifier: &str) -> Result<(), PkceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| PkceError::NotFound(state.to_string()))?;

        let row = sqlx::query(
            "SELECT code_challenge, code_challenge_method, expires_at FROM pkce_challenges WHERE storage_key = ?",
        )
        .bind(Self::storage_key(state))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| PkceError::NotFound(state.to_string()))?
        .ok_or_else(|| PkceError::NotFound(state.to_string()))?;

        sqlx::query("DELETE FROM pkce_challenges WHERE storage_key = ?")
            .bind(Self::storage_key(state))
            .execute(&mut *tx)
            .await
            .map_err(|_| PkceError::NotFound(state.to_string()))?;

        tx.commit().await.map_err(|_| PkceError::NotFound(state.to_string()))?;

        let expires_at: chrono::DateTime<Utc> = row.try_get("expires_at").map_err(|_| PkceError::NotFound(state.to_string()))?;
        if Utc::now() > expires_at {
            return Err(PkceError::Expired(state.to_string()));
        }

        let method: String = row
            .try_get("code_challenge_method")
            .map_err(|_| PkceError::NotFound(state.to_string()))?;
        if method != "S256" {
            return Err(PkceError::UnsupportedMethod(method));
        }

        let code_challenge: String = row
            .try_get("code_challenge")
            .map_err(|_| PkceError::NotFound(state.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let computed = URL_SAFE_NO_PAD.encode(hasher.finalize());

        if computed == code_challenge {
            Ok(())
        } else {
            Err(PkceError::VerifierMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_matches_spec_layout() {
        assert_eq!(MySqlPkceStore::storage_key("state-1"), "pkce:state:state-1");
    }
}
