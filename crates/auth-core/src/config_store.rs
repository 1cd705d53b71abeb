//! Tiered store for translation config (C7): L1 in-process + optional L2
//! Redis (via `auth_cache::MultiLevelCache`) in front of an L3 primary
//! store that owns versioning. Reads prefer the fastest tier that has a
//! fresh copy; writes go straight to L3 and invalidate L1/L2.

use crate::error::GatewayError;
use crate::models::{TranslationConfigSchema, TranslationConfigVersion};
use crate::resilience::{retry, RetryConfig};
use async_trait::async_trait;
use auth_cache::{Cache, MultiLevelCache};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("no config found for id {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Storage(String),
}

impl From<ConfigStoreError> for GatewayError {
    fn from(err: ConfigStoreError) -> Self {
        GatewayError::ConfigUnavailable(err.to_string())
    }
}

/// L3: the durable primary store. Owns version history and the active
/// pointer per config id.
#[async_trait]
pub trait ConfigStoreBackend: Send + Sync {
    async fn get_active(&self, config_id: &str) -> Result<Option<TranslationConfigVersion>, ConfigStoreError>;
    /// Stores a new version without activating it. `set_active` is the only
    /// path that changes which version a `get_active` read observes.
    async fn put_version(
        &self,
        config_id: &str,
        schema: TranslationConfigSchema,
    ) -> Result<TranslationConfigVersion, ConfigStoreError>;
    async fn set_active(&self, config_id: &str, version: u64) -> Result<(), ConfigStoreError>;
    async fn list_versions(&self, config_id: &str) -> Result<Vec<TranslationConfigVersion>, ConfigStoreError>;
    /// Refuses to delete the currently active version.
    async fn delete_version(&self, config_id: &str, version: u64) -> Result<(), ConfigStoreError>;
}

#[derive(Default)]
pub struct InMemoryConfigStoreBackend {
    versions: DashMap<String, Vec<TranslationConfigVersion>>,
    active: DashMap<String, u64>,
}

impl InMemoryConfigStoreBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStoreBackend for InMemoryConfigStoreBackend {
    async fn get_active(&self, config_id: &str) -> Result<Option<TranslationConfigVersion>, ConfigStoreError> {
        let Some(active_version) = self.active.get(config_id).map(|v| *v) else {
            return Ok(None);
        };
        let versions = self.versions.get(config_id);
        Ok(versions.and_then(|vs| vs.iter().find(|v| v.version == active_version).cloned()))
    }

    async fn put_version(
        &self,
        config_id: &str,
        schema: TranslationConfigSchema,
    ) -> Result<TranslationConfigVersion, ConfigStoreError> {
        let mut entry = self.versions.entry(config_id.to_string()).or_default();
        let next_version = entry.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let version = TranslationConfigVersion {
            config_id: config_id.to_string(),
            version: next_version,
            schema,
            created_at: Utc::now(),
        };
        entry.push(version.clone());
        Ok(version)
    }

    async fn set_active(&self, config_id: &str, version: u64) -> Result<(), ConfigStoreError> {
        let exists = self
            .versions
            .get(config_id)
            .map(|vs| vs.iter().any(|v| v.version == version))
            .unwrap_or(false);
        if !exists {
            return Err(ConfigStoreError::NotFound(format!(
                "{config_id}@{version}"
            )));
        }
        self.active.insert(config_id.to_string(), version);
        Ok(())
    }

    async fn list_versions(&self, config_id: &str) -> Result<Vec<TranslationConfigVersion>, ConfigStoreError> {
        Ok(self
            .versions
            .get(config_id)
            .map(|vs| vs.clone())
            .unwrap_or_default())
    }

    async fn delete_version(&self, config_id: &str, version: u64) -> Result<(), ConfigStoreError> {
        if self.active.get(config_id).map(|v| *v) == Some(version) {
            return Err(ConfigStoreError::Storage(format!(
                "cannot delete the active version {config_id}@{version}"
            )));
        }
        if let Some(mut entry) = self.versions.get_mut(config_id) {
            entry.retain(|v| v.version != version);
        }
        Ok(())
    }
}

pub struct ConfigStore {
    l1_l2: MultiLevelCache,
    l1_ttl: Duration,
    backend: Arc<dyn ConfigStoreBackend>,
}

impl ConfigStore {
    pub fn new(l1_l2: MultiLevelCache, l1_ttl: Duration, backend: Arc<dyn ConfigStoreBackend>) -> Self {
        Self {
            l1_l2,
            l1_ttl,
            backend,
        }
    }

    fn cache_key(config_id: &str) -> String {
        format!("translation_config:active:{config_id}")
    }

    pub async fn get_active(
        &self,
        config_id: &str,
    ) -> Result<TranslationConfigVersion, GatewayError> {
        if let Some(cached) = self.l1_l2.get::<TranslationConfigVersion>(&Self::cache_key(config_id)).await {
            return Ok(cached);
        }

        // L3 is the durable backend (MySQL in production); a transient
        // connection blip shouldn't surface as a request failure when an L1
        // hit would otherwise have masked it.
        let version = retry(RetryConfig::default(), || self.backend.get_active(config_id))
            .await
            .map_err(GatewayError::from)?
            .ok_or_else(|| GatewayError::ConfigUnavailable(format!("no config for {config_id}")))?;

        let _ = self
            .l1_l2
            .set(&Self::cache_key(config_id), &version, self.l1_ttl)
            .await;

        Ok(version)
    }

    /// Stages a new version without activating it. Use `set_active` (or
    /// `publish`, which does both in one call) to make it the version
    /// `get_active` returns.
    pub async fn save(
        &self,
        config_id: &str,
        schema: TranslationConfigSchema,
    ) -> Result<TranslationConfigVersion, GatewayError> {
        self.backend
            .put_version(config_id, schema)
            .await
            .map_err(GatewayError::from)
    }

    /// Activates an already-staged version, invalidating every cache tier
    /// so the next read observes it immediately.
    pub async fn set_active(&self, config_id: &str, version: u64) -> Result<(), GatewayError> {
        self.backend
            .set_active(config_id, version)
            .await
            .map_err(GatewayError::from)?;
        self.l1_l2.invalidate_l1(&Self::cache_key(config_id));
        let _ = self.l1_l2.delete(&Self::cache_key(config_id)).await;
        Ok(())
    }

    /// Stages a new version and immediately activates it — `save` followed
    /// by `set_active` in one call, for the common case of a straight
    /// publish with no intermediate staging.
    pub async fn publish(
        &self,
        config_id: &str,
        schema: TranslationConfigSchema,
    ) -> Result<TranslationConfigVersion, GatewayError> {
        let version = self.save(config_id, schema).await?;
        self.set_active(config_id, version.version).await?;
        Ok(version)
    }

    pub async fn rollback(&self, config_id: &str, version: u64) -> Result<(), GatewayError> {
        self.set_active(config_id, version).await
    }

    pub async fn list_versions(
        &self,
        config_id: &str,
    ) -> Result<Vec<TranslationConfigVersion>, GatewayError> {
        self.backend
            .list_versions(config_id)
            .await
            .map_err(GatewayError::from)
    }

    /// Deletes a staged (non-active) version. Deleting the active version
    /// is rejected by the backend.
    pub async fn delete(&self, config_id: &str, version: u64) -> Result<(), GatewayError> {
        self.backend
            .delete_version(config_id, version)
            .await
            .map_err(GatewayError::from)
    }
}
