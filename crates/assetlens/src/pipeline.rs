//! Extraction pipeline: acquire → collect → {colors, fonts} → result.

use crate::acquire::PageAcquirer;
use crate::collect::ResourceCollector;
use crate::colors::ColorExtractor;
use crate::config::ExtractorConfig;
use crate::fonts;
use crate::http_client::HttpClient;
use crate::progress::{emit, ProgressSender, ProgressStage};
use crate::renderer::Renderer;
use crate::stylesheets;
use crate::types::{ExtractError, ExtractResult, ExtractionResult};
use crate::url_norm;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runs one extraction end to end. Holds no per-request state, so a single
/// instance serves concurrent requests.
pub struct ExtractionPipeline {
    acquirer: PageAcquirer,
    collector: ResourceCollector,
    colors: ColorExtractor,
    http: HttpClient,
    config: Arc<ExtractorConfig>,
}

impl ExtractionPipeline {
    pub fn new(renderer: Arc<dyn Renderer>, config: Arc<ExtractorConfig>) -> Self {
        let http = HttpClient::new(&config.user_agent, config.http_fallback_timeout);
        Self {
            acquirer: PageAcquirer::new(renderer, http.clone(), Arc::clone(&config)),
            collector: ResourceCollector::new(http.clone(), Arc::clone(&config)),
            colors: ColorExtractor::new(http.clone(), Arc::clone(&config)),
            http,
            config,
        }
    }

    /// Extract `url`, reporting progress on `progress` when given.
    ///
    /// Ends with `extraction_complete` or `extraction_failed`.
    pub async fn run(
        &self,
        url: &str,
        progress: Option<ProgressSender>,
    ) -> ExtractResult<ExtractionResult> {
        if !url_norm::is_valid_http_url(url) {
            return Err(ExtractError::InvalidUrl(url.to_string()));
        }

        let started = Instant::now();
        match self.run_stages(url, &progress).await {
            Ok(mut result) => {
                result.extraction_time_ms = started.elapsed().as_millis() as u64;
                info!(
                    "extracted {url} in {}ms: {} css colors, {} image colors, {} fonts, {} images",
                    result.extraction_time_ms,
                    result.colors.from_css.len(),
                    result.colors.from_images.len(),
                    result.fonts.len(),
                    result.assets.images.len()
                );
                emit(
                    &progress,
                    ProgressStage::ExtractionComplete,
                    json!({ "extraction_time_ms": result.extraction_time_ms }),
                );
                Ok(result)
            }
            Err(e) => {
                warn!("extraction of {url} failed: {e}");
                emit(
                    &progress,
                    ProgressStage::ExtractionFailed,
                    json!({ "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        url: &str,
        progress: &Option<ProgressSender>,
    ) -> ExtractResult<ExtractionResult> {
        let page = self.acquirer.acquire(url, progress).await?;
        let assets = self.collector.collect(&page, progress).await;
        let sources =
            stylesheets::load(&page.html, &assets.stylesheets, &self.http, &self.config).await;

        let (colors, fonts) = tokio::join!(
            self.colors
                .extract(&sources, &page.computed, &assets.images, progress),
            async { fonts::extract(&page, &sources, progress) },
        );

        Ok(ExtractionResult {
            url: url.to_string(),
            colors,
            fonts,
            assets,
            result_id: None,
            timestamp: Utc::now(),
            cached: false,
            extraction_time_ms: 0,
        })
    }
}
