//! `signing_keys` table: the durable counterpart to
//! `auth_crypto::InMemoryKeyStore`. Status transitions are still
//! compare-and-set, enforced with a row lock (`SELECT ... FOR UPDATE`)
//! inside a transaction rather than `DashMap::get_mut`.

use async_trait::async_trait;
use auth_crypto::{KeyStatus, KeyStore, KeyStoreError, SigningKeyRecord};
use secrecy::{ExposeSecret, Secret};
use sqlx::{MySql, Pool, Row};

pub struct MySqlKeyStore {
    pool: Pool<MySql>,
}

impl MySqlKeyStore {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

fn status_str(status: KeyStatus) -> &'static str {
    match status {
        KeyStatus::Pending => "PENDING",
        KeyStatus::Active => "ACTIVE",
        KeyStatus::Deprecated => "DEPRECATED",
        KeyStatus::Retired => "RETIRED",
    }
}

fn is_legal_edge(from: KeyStatus, to: KeyStatus) -> bool {
    matches!(
        (from, to),
        (KeyStatus::Pending, KeyStatus::Active)
            | (KeyStatus::Active, KeyStatus::Deprecated)
            | (KeyStatus::Deprecated, KeyStatus::Retired)
    )
}

fn status_from_str(s: &str) -> Result<KeyStatus, KeyStoreError> {
    match s {
        "PENDING" => Ok(KeyStatus::Pending),
        "ACTIVE" => Ok(KeyStatus::Active),
        "DEPRECATED" => Ok(KeyStatus::Deprecated),
        "RETIRED" => Ok(KeyStatus::Retired),
        other => Err(KeyStoreError::Storage(format!("unknown key status {other}"))),
    }
}

fn row_to_record(row: &sqlx::mysql::MySqlRow) -> Result<SigningKeyRecord, KeyStoreError> {
    let status: String = row.try_get("status").map_err(|e| KeyStoreError::Storage(e.to_string()))?;
    let private_key_pem: String = row
        .try_get("private_key_pem")
        .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
    Ok(SigningKeyRecord {
        kid: row.try_get("kid").map_err(|e| KeyStoreError::Storage(e.to_string()))?,
        status: status_from_str(&status)?,
        algorithm: row.try_get("algorithm").map_err(|e| KeyStoreError::Storage(e.to_string()))?,
        private_key_pem: Secret::new(private_key_pem),
        public_key_pem: row
            .try_get("public_key_pem")
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| KeyStoreError::Storage(e.to_string()))?,
        activated_at: row.try_get("activated_at").map_err(|e| KeyStoreError::Storage(e.to_string()))?,
        deprecated_at: row.try_get("deprecated_at").map_err(|e| KeyStoreError::Storage(e.to_string()))?,
        retired_at: row.try_get("retired_at").map_err(|e| KeyStoreError::Storage(e.to_string()))?,
    })
}

#[async_trait]
impl KeyStore for MySqlKeyStore {
    async fn create(&self, record: SigningKeyRecord) -> Result<(), KeyStoreError> {
        let result = sqlx::query(
            r#"
            INSERT IGNORE INTO signing_keys (
                kid, status, algorithm, private_key_pem, public_key_pem,
                created_at, activated_at, deprecated_at, retired_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.kid)
        .bind(status_str(record.status))
        .bind(&record.algorithm)
        .bind(record.private_key_pem.expose_secret())
        .bind(&record.public_key_pem)
        .bind(record.created_at)
        .bind(record.activated_at)
        .bind(record.deprecated_at)
        .bind(record.retired_at)
        .execute(&self.pool)
        .await
        .map_err(|e| KeyStoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(KeyStoreError::AlreadyExists(record.kid));
        }
        Ok(())
    }

    async fn get(&self, kid: &str) -> Result<Option<SigningKeyRecord>, KeyStoreError> {
        let row = sqlx::query("SELECT * FROM signing_keys WHERE kid = ?")
            .bind(kid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn active(&self) -> Result<Option<SigningKeyRecord>, KeyStoreError> {
        let row = sqlx::query("SELECT * FROM signing_keys WHERE status = 'ACTIVE' LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn publishable(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        let rows = sqlx::query("SELECT * FROM signing_keys WHERE status IN ('ACTIVE', 'DEPRECATED')")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn all(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        let rows = sqlx::query("SELECT * FROM signing_keys")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn pending(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        let rows = sqlx::query("SELECT * FROM signing_keys WHERE status = 'PENDING'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn deprecated(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        let rows = sqlx::query("SELECT * FROM signing_keys WHERE status = 'DEPRECATED'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn retired(&self) -> Result<Vec<SigningKeyRecord>, KeyStoreError> {
        let rows = sqlx::query("SELECT * FROM signing_keys WHERE status = 'RETIRED'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn transition(
        &self,
        kid: &str,
        expected: KeyStatus,
        to: KeyStatus,
    ) -> Result<(), KeyStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;

        let row = sqlx::query("SELECT status FROM signing_keys WHERE kid = ? FOR UPDATE")
            .bind(kid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?
            .ok_or_else(|| KeyStoreError::NotFound(kid.to_string()))?;

        let current: String = row.try_get("status").map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        let current = status_from_str(&current)?;
        if current != expected || !is_legal_edge(expected, to) {
            return Err(KeyStoreError::IllegalTransition {
                kid: kid.to_string(),
                from: current,
                to,
            });
        }

        let timestamp_column = match to {
            KeyStatus::Active => Some("activated_at"),
            KeyStatus::Deprecated => Some("deprecated_at"),
            KeyStatus::Retired => Some("retired_at"),
            KeyStatus::Pending => None,
        };

        let result = if let Some(column) = timestamp_column {
            sqlx::query(&format!(
                "UPDATE signing_keys SET status = ?, {column} = ? WHERE kid = ? AND status = ?"
            ))
            .bind(status_str(to))
            .bind(chrono::Utc::now())
            .bind(kid)
            .bind(status_str(expected))
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query("UPDATE signing_keys SET status = ? WHERE kid = ? AND status = ?")
                .bind(status_str(to))
                .bind(kid)
                .bind(status_str(expected))
                .execute(&mut *tx)
                .await
        }
        .map_err(|e| KeyStoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(KeyStoreError::IllegalTransition {
                kid: kid.to_string(),
                from: current,
                to,
            });
        }

        tx.commit().await.map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Locks both rows (candidate first, then the current ACTIVE key, in
    /// a fixed order to avoid lock-ordering deadlocks with a concurrent
    /// promote) inside one transaction, validates both halves, then writes
    /// both. A failure after the lock and before commit rolls back the
    /// whole swap — the store never settles on zero ACTIVE keys.
    async fn promote(
        &self,
        new_active_kid: &str,
        previous_active_kid: Option<&str>,
    ) -> Result<(), KeyStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;

        let candidate_row = sqlx::query("SELECT status FROM signing_keys WHERE kid = ? FOR UPDATE")
            .bind(new_active_kid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?
            .ok_or_else(|| KeyStoreError::NotFound(new_active_kid.to_string()))?;
        let candidate_status: String = candidate_row
            .try_get("status")
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        let candidate_status = status_from_str(&candidate_status)?;
        if candidate_status != KeyStatus::Pending {
            return Err(KeyStoreError::IllegalTransition {
                kid: new_active_kid.to_string(),
                from: candidate_status,
                to: KeyStatus::Active,
            });
        }

        if let Some(previous) = previous_active_kid {
            let previous_row = sqlx::query("SELECT status FROM signing_keys WHERE kid = ? FOR UPDATE")
                .bind(previous)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| KeyStoreError::Storage(e.to_string()))?
                .ok_or_else(|| KeyStoreError::NotFound(previous.to_string()))?;
            let previous_status: String = previous_row
                .try_get("status")
                .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
            let previous_status = status_from_str(&previous_status)?;
            if previous_status != KeyStatus::Active {
                return Err(KeyStoreError::IllegalTransition {
                    kid: previous.to_string(),
                    from: previous_status,
                    to: KeyStatus::Deprecated,
                });
            }

            let result = sqlx::query(
                "UPDATE signing_keys SET status = 'DEPRECATED', deprecated_at = ? WHERE kid = ? AND status = 'ACTIVE'",
            )
            .bind(chrono::Utc::now())
            .bind(previous)
            .execute(&mut *tx)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
            if result.rows_affected() == 0 {
                return Err(KeyStoreError::IllegalTransition {
                    kid: previous.to_string(),
                    from: previous_status,
                    to: KeyStatus::Deprecated,
                });
            }
        }

        let result = sqlx::query(
            "UPDATE signing_keys SET status = 'ACTIVE', activated_at = ? WHERE kid = ? AND status = 'PENDING'",
        )
        .bind(chrono::Utc::now())
        .bind(new_active_kid)
        .execute(&mut *tx)
        .await
        .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(KeyStoreError::IllegalTransition {
                kid: new_active_kid.to_string(),
                from: candidate_status,
                to: KeyStatus::Active,
            });
        }

        tx.commit().await.map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn purge(&self, kid: &str) -> Result<(), KeyStoreError> {
        let result = sqlx::query("DELETE FROM signing_keys WHERE kid = ?")
            .bind(kid)
            .execute(&self.pool)
            .await
            .map_err(|e| KeyStoreError::Storage(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(KeyStoreError::NotFound(kid.to_string()));
        }
        Ok(())
    }
}
