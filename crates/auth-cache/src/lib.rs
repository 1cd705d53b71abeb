use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T>;
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// L1 (in-process) + optional L2 (Redis). `l2` is `None` when the deployment
/// runs without a shared cache tier (`translation.l2_enabled = false`),
/// in which case every `get` that misses L1 reports a miss rather than
/// erroring.
pub struct MultiLevelCache {
    l1: DashMap<String, (String, Instant)>,
    l1_max_size: usize,
    l2: Option<Client>,
}

impl MultiLevelCache {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            l1: DashMap::new(),
            l1_max_size: usize::MAX,
            l2: Some(client),
        })
    }

    /// L1-only cache, used when the deployment has no Redis tier.
    pub fn l1_only(l1_max_size: usize) -> Self {
        Self {
            l1: DashMap::new(),
            l1_max_size,
            l2: None,
        }
    }

    pub fn with_l1_bound(mut self, l1_max_size: usize) -> Self {
        self.l1_max_size = l1_max_size;
        self
    }

    // Used for L1 invalidation simulation in tests, and for explicit
    // config-change propagation (a writer bypasses stale L1 entries it
    // knows it just overwrote in L3).
    pub fn invalidate_l1(&self, key: &str) {
        self.l1.remove(key);
    }

    fn insert_l1(&self, key: &str, val_str: String, ttl: Duration) {
        if self.l1.len() >= self.l1_max_size && !self.l1.contains_key(key) {
            // Simple bounded eviction: drop an arbitrary existing entry.
            // Good enough for a config/translation cache with a uniform
            // TTL and a small working set; this is not meant to be an LRU.
            if let Some(evict_key) = self.l1.iter().next().map(|e| e.key().clone()) {
                self.l1.remove(&evict_key);
            }
        }
        self.l1.insert(key.to_string(), (val_str, Instant::now() + ttl));
    }
}

#[async_trait]
impl Cache for MultiLevelCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        // L1 Check
        if let Some(entry) = self.l1.get(key) {
            if entry.1 > Instant::now() {
                debug!("L1 Cache Hit: {}", key);
                if let Ok(val) = serde_json::from_str(&entry.0) {
                    return Some(val);
                }
            } else {
                drop(entry);
                self.l1.remove(key);
            }
        }

        let Some(l2) = &self.l2 else {
            return None;
        };

        let mut conn = match l2.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => {
                error!("Redis connection error: {}", e);
                return None;
            }
        };

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(val_str)) => {
                debug!("L2 Cache Hit: {}", key);
                self.insert_l1(key, val_str.clone(), Duration::from_secs(60));
                serde_json::from_str(&val_str).ok()
            }
            Ok(None) => None,
            Err(e) => {
                error!("Redis get error: {}", e);
                None
            }
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> anyhow::Result<()> {
        let val_str = serde_json::to_string(value)?;
        self.insert_l1(key, val_str.clone(), ttl);

        if let Some(l2) = &self.l2 {
            let mut conn = l2.get_multiplexed_async_connection().await?;
            let _: () = conn.set_ex(key, val_str, ttl.as_secs().max(1)).await?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.l1.remove(key);
        if let Some(l2) = &self.l2 {
            let mut conn = l2.get_multiplexed_async_connection().await?;
            let _: () = conn.del(key).await?;
        }
        Ok(())
    }
}
