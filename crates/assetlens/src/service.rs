//! `AssetExtractor`: the cache-aware entry point used by the server and CLI.

use crate::cache::{CacheStore, MemoryCacheStore, ResultCache};
use crate::config::ExtractorConfig;
use crate::pipeline::ExtractionPipeline;
use crate::renderer::Renderer;
use crate::stream::{self, CancelHandle, FrameStream};
use crate::types::{CachedResultsList, ExtractError, ExtractResult, ExtractionResult};
use crate::url_norm;
use std::sync::Arc;
use tracing::{info, warn};

/// Cheap to clone; clones share the pipeline and cache.
#[derive(Clone)]
pub struct AssetExtractor {
    pipeline: Arc<ExtractionPipeline>,
    cache: ResultCache,
    config: Arc<ExtractorConfig>,
}

fn validate(url: &str) -> ExtractResult<&str> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ExtractError::InvalidUrl("Missing URL parameter".to_string()));
    }
    if !url_norm::is_valid_http_url(url) {
        return Err(ExtractError::InvalidUrl(url.to_string()));
    }
    Ok(url)
}

impl AssetExtractor {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn CacheStore>,
        config: ExtractorConfig,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            pipeline: Arc::new(ExtractionPipeline::new(renderer, Arc::clone(&config))),
            cache: ResultCache::new(store, config.cache_ttl),
            config,
        }
    }

    /// Extractor backed by an in-process cache.
    pub fn in_memory(renderer: Arc<dyn Renderer>, config: ExtractorConfig) -> Self {
        Self::new(renderer, Arc::new(MemoryCacheStore::new()), config)
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Cache lookup that treats store failures as a miss.
    async fn lookup(&self, url: &str) -> Option<ExtractionResult> {
        match self.cache.get_by_url(url).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("cache lookup for {url} failed: {e}");
                None
            }
        }
    }

    /// Extract `url`, serving from the cache unless `force_refresh`.
    pub async fn extract(
        &self,
        url: &str,
        force_refresh: bool,
    ) -> ExtractResult<ExtractionResult> {
        let url = validate(url)?;

        if !force_refresh {
            if let Some(hit) = self.lookup(url).await {
                info!("serving {url} from cache");
                return Ok(hit);
            }
        }

        let mut result = self.pipeline.run(url, None).await?;
        store_result(&self.cache, &mut result).await;
        Ok(result)
    }

    /// Streamed variant of [`extract`](Self::extract).
    ///
    /// Rejected input yields `error`, `end`. A cache hit replays the stored
    /// result. Otherwise the pipeline runs as a task; dropping the stream
    /// or calling [`CancelHandle::cancel`] stops it.
    pub async fn stream(&self, url: &str, force_refresh: bool) -> (FrameStream, CancelHandle) {
        let (cancel, cancel_rx) = CancelHandle::new();

        let url = url.trim();
        if url.is_empty() {
            return (stream::error_stream("Missing URL parameter".to_string()), cancel);
        }
        if !url_norm::is_valid_http_url(url) {
            return (stream::error_stream("Invalid URL format".to_string()), cancel);
        }
        let url = url.to_string();

        if !force_refresh {
            if let Some(hit) = self.lookup(&url).await {
                return (
                    stream::cached_stream(hit, self.config.cached_replay_delay),
                    cancel,
                );
            }
        }

        let pipeline = Arc::clone(&self.pipeline);
        let cache = self.cache.clone();
        let target = url.clone();
        let events = stream::live_stream(
            url,
            move |tx| async move {
                let mut result = pipeline.run(&target, Some(tx)).await?;
                store_result(&cache, &mut result).await;
                Ok::<_, ExtractError>(result)
            },
            self.config.stream_poll_interval,
            cancel_rx,
        );
        (events, cancel)
    }

    /// Cached result by ID.
    pub async fn cached(&self, id: &str) -> ExtractResult<ExtractionResult> {
        self.cache.get_by_id(id).await
    }

    pub async fn list_cached(
        &self,
        limit: usize,
        offset: usize,
    ) -> ExtractResult<CachedResultsList> {
        self.cache.list(limit, offset).await
    }

    pub async fn cache_available(&self) -> bool {
        self.cache.available().await
    }
}

/// Store a fresh result. A failed write leaves the result without an ID.
async fn store_result(cache: &ResultCache, result: &mut ExtractionResult) {
    if let Err(e) = cache.store(result).await {
        warn!("could not cache result for {}: {e}", result.url);
        result.result_id = None;
    }
}
