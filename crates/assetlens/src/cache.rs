//! Result cache: opaque IDs, URL↔ID indirection and paginated listing.
//!
//! Storage goes through the [`CacheStore`] key/value primitives. Each stored
//! result owns two keys with the same TTL:
//!
//! - `url:<url>` holds the serialized [`ExtractionResult`]
//! - `result:<id>` holds the source URL
//!
//! so a lookup by ID is always ID → URL → result.

use crate::types::{
    CachedResultInfo, CachedResultsList, ExtractError, ExtractResult, ExtractionResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const URL_PREFIX: &str = "url:";
const RESULT_PREFIX: &str = "result:";

pub fn url_key(url: &str) -> String {
    format!("{URL_PREFIX}{url}")
}

pub fn result_key(id: &str) -> String {
    format!("{RESULT_PREFIX}{id}")
}

/// Key/value substrate with per-key expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> ExtractResult<()>;
    async fn get(&self, key: &str) -> ExtractResult<Option<String>>;
    async fn delete(&self, key: &str) -> ExtractResult<()>;
    /// Whether the store is reachable.
    async fn ping(&self) -> bool;
    /// Live keys starting with `prefix`, in the store's natural order.
    async fn scan(&self, prefix: &str) -> ExtractResult<Vec<String>>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process store. Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> ExtractResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> ExtractResult<Option<String>> {
        let (value, expired) = match self.entries.get(key) {
            Some(entry) if entry.is_expired() => (None, true),
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        };
        if expired {
            self.entries.remove_if(key, |_, e| e.is_expired());
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> ExtractResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn scan(&self, prefix: &str) -> ExtractResult<Vec<String>> {
        self.entries.retain(|_, e| !e.is_expired());
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }
}

/// Stores and retrieves extraction results.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Whether the backing store answers.
    pub async fn available(&self) -> bool {
        self.store.ping().await
    }

    /// Assign a fresh ID to `result`, mark it uncached and store it under
    /// both keys. Returns the ID.
    pub async fn store(&self, result: &mut ExtractionResult) -> ExtractResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        result.result_id = Some(id.clone());
        result.cached = false;

        let payload = serde_json::to_string(result)?;
        self.store
            .put(&url_key(&result.url), payload, self.ttl)
            .await?;
        self.store
            .put(&result_key(&id), result.url.clone(), self.ttl)
            .await?;

        debug!("cached {} as {id}", result.url);
        Ok(id)
    }

    /// Cached result for `url`, marked `cached = true`.
    pub async fn get_by_url(&self, url: &str) -> ExtractResult<Option<ExtractionResult>> {
        let Some(payload) = self.store.get(&url_key(url)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ExtractionResult>(&payload) {
            Ok(mut result) => {
                result.cached = true;
                Ok(Some(result))
            }
            Err(e) => {
                warn!("dropping unreadable cache entry for {url}: {e}");
                self.store.delete(&url_key(url)).await?;
                Ok(None)
            }
        }
    }

    /// Resolve `id` → URL → result.
    pub async fn get_by_id(&self, id: &str) -> ExtractResult<ExtractionResult> {
        let url = self
            .store
            .get(&result_key(id))
            .await?
            .ok_or_else(|| ExtractError::NotFound(id.to_string()))?;
        self.get_by_url(&url)
            .await?
            .ok_or_else(|| ExtractError::NotFound(id.to_string()))
    }

    /// A page of stored results.
    ///
    /// `total` counts every live `result:` key; entries whose result has
    /// expired are counted but left out of the page. Keys are sorted so
    /// offsets are stable between calls.
    pub async fn list(&self, limit: usize, offset: usize) -> ExtractResult<CachedResultsList> {
        if !self.store.ping().await {
            return Err(ExtractError::Cache("result store is unreachable".to_string()));
        }
        let mut keys = self.store.scan(RESULT_PREFIX).await?;
        keys.sort();
        let total = keys.len();

        let mut results = Vec::new();
        for key in keys.iter().skip(offset).take(limit) {
            let id = &key[RESULT_PREFIX.len()..];
            let Some(url) = self.store.get(key).await? else {
                continue;
            };
            let Some(result) = self.get_by_url(&url).await? else {
                continue;
            };
            results.push(CachedResultInfo {
                id: id.to_string(),
                url,
                timestamp: Some(result.timestamp),
            });
        }

        Ok(CachedResultsList {
            total,
            limit,
            offset,
            results,
        })
    }
}
