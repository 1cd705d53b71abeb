//! `translation_config_versions` table plus a one-row-per-config-id
//! `translation_config_active` pointer table — the L3 primary store behind
//! `auth_core::config_store::ConfigStore`'s L1/L2 tiers.

use async_trait::async_trait;
use auth_core::config_store::{ConfigStoreBackend, ConfigStoreError};
use auth_core::models::{TranslationConfigSchema, TranslationConfigVersion};
use sqlx::{MySql, Pool, Row};

pub struct MySqlConfigStoreBackend {
    pool: Pool<MySql>,
}

impl MySqlConfigStoreBackend {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

fn row_to_version(row: &sqlx::mysql::MySqlRow) -> Result<TranslationConfigVersion, ConfigStoreError> {
    let schema_json: String = row
        .try_get("schema_json")
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;
    let schema: TranslationConfigSchema =
        serde_json::from_str(&schema_json).map_err(|e| ConfigStoreError::Storage(e.to_string()))?;
    Ok(TranslationConfigVersion {
        config_id: row
            .try_get("config_id")
            .map_err(|e| ConfigStoreError::Storage(e.to_string()))?,
        version: {
            let v: i64 = row.try_get("version").map_err(|e| ConfigStoreError::Storage(e.to_string()))?;
            v as u64
        },
        schema,
        created_at: row
            .try_get("created_at")
            .map_err(|e| ConfigStoreError::Storage(e.to_string()))?,
    })
}

#[async_trait]
impl ConfigStoreBackend for MySqlConfigStoreBackend {
    async fn get_active(&self, config_id: &str) -> Result<Option<TranslationConfigVersion>, ConfigStoreError> {
        let row = sqlx::query(
            r#"
            SELECT v.config_id, v.version, v.schema_json, v.created_at
            FROM translation_config_versions v
            INNER JOIN translation_config_active a
                ON a.config_id = v.config_id AND a.active_version = v.version
            WHERE v.config_id = ?
            "#,
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_version).transpose()
    }

    async fn put_version(
        &self,
        config_id: &str,
        schema: TranslationConfigSchema,
    ) -> Result<TranslationConfigVersion, ConfigStoreError> {
        let schema_json =
            serde_json::to_string(&schema).map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        let next_version: i64 = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS next FROM translation_config_versions WHERE config_id = ?",
        )
        .bind(config_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?
        .try_get("next")
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        let created_at = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO translation_config_versions (config_id, version, schema_json, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(config_id)
        .bind(next_version)
        .bind(&schema_json)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        tx.commit().await.map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        Ok(TranslationConfigVersion {
            config_id: config_id.to_string(),
            version: next_version as u64,
            schema,
            created_at,
        })
    }

    async fn set_active(&self, config_id: &str, version: u64) -> Result<(), ConfigStoreError> {
        let exists: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM translation_config_versions WHERE config_id = ? AND version = ?",
        )
        .bind(config_id)
        .bind(version as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?
        .try_get("count")
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        if exists == 0 {
            return Err(ConfigStoreError::NotFound(format!("{config_id}@{version}")));
        }

        sqlx::query(
            r#"
            INSERT INTO translation_config_active (config_id, active_version) VALUES (?, ?)
            ON DUPLICATE KEY UPDATE active_version = VALUES(active_version)
            "#,
        )
        .bind(config_id)
        .bind(version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn list_versions(&self, config_id: &str) -> Result<Vec<TranslationConfigVersion>, ConfigStoreError> {
        let rows = sqlx::query(
            "SELECT config_id, version, schema_json, created_at FROM translation_config_versions WHERE config_id = ? ORDER BY version",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        rows.iter().map(row_to_version).collect()
    }

    /// Refuses to delete a version that `translation_config_active` still
    /// points to.
    async fn delete_version(&self, config_id: &str, version: u64) -> Result<(), ConfigStoreError> {
        let active: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM translation_config_active WHERE config_id = ? AND active_version = ?",
        )
        .bind(config_id)
        .bind(version as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?
        .try_get("count")
        .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        if active > 0 {
            return Err(ConfigStoreError::Storage(format!(
                "cannot delete the active version {config_id}@{version}"
            )));
        }

        sqlx::query("DELETE FROM translation_config_versions WHERE config_id = ? AND version = ?")
            .bind(config_id)
            .bind(version as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| ConfigStoreError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_core::models::{
        ClaimSource, ClaimSourceType, RoleGrant, RoleMappings, TranslationDefaults,
    };
    use std::collections::HashMap;

    #[test]
    fn schema_round_trips_through_the_json_column_encoding() {
        let mut role_to_permissions = HashMap::new();
        role_to_permissions.insert(
            "engineers".to_string(),
            RoleGrant::Permissions(vec!["code:read".to_string()]),
        );
        let schema = TranslationConfigSchema {
            version: 1,
            sources: vec![ClaimSource {
                name: "group".to_string(),
                claim_path: "group".to_string(),
                source_type: ClaimSourceType::Single,
            }],
            transforms: vec![],
            mappings: RoleMappings {
                role_to_permissions,
                direct_permissions: HashMap::new(),
            },
            defaults: TranslationDefaults {
                deny_if_no_match: true,
                include_unmapped: false,
            },
        };
        let encoded = serde_json::to_string(&schema).unwrap();
        let decoded: TranslationConfigSchema = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn role_ref_grant_round_trips_through_the_json_column_encoding() {
        let mut role_to_permissions = HashMap::new();
        role_to_permissions.insert("engineers".to_string(), RoleGrant::Ref(uuid::Uuid::new_v4()));
        let schema = TranslationConfigSchema {
            version: 1,
            sources: vec![ClaimSource {
                name: "group".to_string(),
                claim_path: "group".to_string(),
                source_type: ClaimSourceType::Single,
            }],
            transforms: vec![],
            mappings: RoleMappings {
                role_to_permissions,
                direct_permissions: HashMap::new(),
            },
            defaults: TranslationDefaults {
                deny_if_no_match: true,
                include_unmapped: false,
            },
        };
        let encoded = serde_json::to_string(&schema).unwrap();
        let decoded: TranslationConfigSchema = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, schema);
    }
}
