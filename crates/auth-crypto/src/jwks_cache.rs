//! Caches the external IdP's JWKS document so `TokenValidator` doesn't hit
//! the network on every request. Coalesces concurrent refreshes and serves
//! stale keys for a bounded window if the IdP is unreachable.

use crate::jwks::{Jwk, JwksDocument};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum JwksCacheError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("no cached JWKS available and fetch failed: {0}")]
    Unavailable(String),
}

#[derive(Clone)]
struct CachedDoc {
    document: JwksDocument,
    fetched_at: Instant,
}

/// Anything that can hand back a parsed JWKS document from a URL. Abstracted
/// so tests don't need a live HTTP server.
#[async_trait::async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<JwksDocument, JwksCacheError>;
}

pub struct HttpJwksFetcher {
    client: reqwest::Client,
}

impl HttpJwksFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpJwksFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait::async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, url: &str) -> Result<JwksDocument, JwksCacheError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| JwksCacheError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| JwksCacheError::Fetch(e.to_string()))?;

        parse_json(response).await
    }
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, JwksCacheError> {
    response
        .json::<T>()
        .await
        .map_err(|e| JwksCacheError::Fetch(e.to_string()))
}

pub struct JwksCache {
    fetcher: Arc<dyn JwksFetcher>,
    url: String,
    refresh_interval: Duration,
    stale_while_error: Duration,
    cached: Mutex<Option<CachedDoc>>,
}

impl JwksCache {
    pub fn new(
        fetcher: Arc<dyn JwksFetcher>,
        url: String,
        refresh_interval: Duration,
        stale_while_error: Duration,
    ) -> Self {
        Self {
            fetcher,
            url,
            refresh_interval,
            stale_while_error,
            cached: Mutex::new(None),
        }
    }

    /// Returns a JWKS document: a fresh one if the cache is stale or empty,
    /// otherwise the in-memory copy. If a refresh fails and the cached copy
    /// is still within `stale_while_error`, the stale copy is returned
    /// instead of propagating the error (fail-open within the window).
    pub async fn get(&self) -> Result<JwksDocument, JwksCacheError> {
        let mut guard = self.cached.lock().await;
        let needs_refresh = match &*guard {
            None => true,
            Some(cached) => cached.fetched_at.elapsed() >= self.refresh_interval,
        };
        self.refresh_if_needed(&mut guard, needs_refresh).await
    }

    /// Returns the key with `kid` if present. On a cache miss OR when `kid`
    /// isn't in the currently cached set, triggers a refresh — independent
    /// of the time-based TTL `get` uses — so a key rotated in since the
    /// last fetch is picked up without waiting out the refresh interval.
    /// Coalesced per-cache via the same mutex `get` uses, so concurrent
    /// callers racing on the same miss only trigger one fetch.
    pub async fn get_key(&self, kid: &str) -> Result<Option<Jwk>, JwksCacheError> {
        let mut guard = self.cached.lock().await;

        let ttl_stale = match &*guard {
            None => true,
            Some(cached) => cached.fetched_at.elapsed() >= self.refresh_interval,
        };
        let document = self.refresh_if_needed(&mut guard, ttl_stale).await?;
        if let Some(jwk) = document.keys.iter().find(|k| k.kid == kid) {
            return Ok(Some(jwk.clone()));
        }

        // kid still unknown after whatever refresh already happened above;
        // if that refresh was only TTL-driven (or skipped), force exactly
        // one more attempt before giving up.
        if !ttl_stale {
            let document = self.force_refresh(&mut guard).await?;
            return Ok(document.keys.iter().find(|k| k.kid == kid).cloned());
        }
        Ok(None)
    }

    async fn refresh_if_needed(
        &self,
        slot: &mut Option<CachedDoc>,
        needs_refresh: bool,
    ) -> Result<JwksDocument, JwksCacheError> {
        if !needs_refresh {
            return Ok(slot.as_ref().unwrap().document.clone());
        }
        self.force_refresh(slot).await
    }

    async fn force_refresh(&self, slot: &mut Option<CachedDoc>) -> Result<JwksDocument, JwksCacheError> {
        match self.fetcher.fetch(&self.url).await {
            Ok(document) => {
                *slot = Some(CachedDoc {
                    document: document.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(document)
            }
            Err(err) => match slot.as_ref() {
                Some(cached) if cached.fetched_at.elapsed() < self.stale_while_error => {
                    tracing::warn!(error = %err, "JWKS refresh failed, serving stale copy");
                    Ok(cached.document.clone())
                }
                _ => Err(JwksCacheError::Unavailable(err.to_string())),
            },
        }
    }
}
