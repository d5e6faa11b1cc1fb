//! Page acquisition with a layered fallback.
//!
//! Rendering is tried with an ordered list of navigation strategies, each
//! in a fresh browser context. If every strategy fails, or no browser is
//! available, the page is fetched with a plain GET instead.

use crate::config::ExtractorConfig;
use crate::http_client::HttpClient;
use crate::progress::{emit, ProgressSender, ProgressStage};
use crate::renderer::{ObservedResource, RenderContext, Renderer, WaitStrategy};
use crate::types::{ExtractError, ExtractResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Surfaces resources not visible in static markup.
const DISCOVERY_SCRIPT: &str = r#"(() => {
  const media = /["'`]((?:https?:)?\/\/[^"'`\s<>]+?\.(?:jpe?g|png|gif|webp|avif|svg|mp4|webm|ogv|mov)(?:\?[^"'`\s<>]*)?|\/[^"'`\s<>]+?\.(?:jpe?g|png|gif|webp|avif|svg|mp4|webm|ogv|mov)(?:\?[^"'`\s<>]*)?)["'`]/gi;
  const scan = (text, out) => {
    media.lastIndex = 0;
    let m;
    while ((m = media.exec(text)) !== null) out.push(m[1]);
  };
  const scriptUrls = [];
  document.querySelectorAll('script:not([src])').forEach(s => scan(s.textContent || '', scriptUrls));
  const stateUrls = [];
  for (const key of ['__NEXT_DATA__', '__NUXT__', '__INITIAL_STATE__', '__APOLLO_STATE__', '__PRELOADED_STATE__']) {
    try {
      const value = window[key];
      if (value) scan(JSON.stringify(value), stateUrls);
    } catch (e) {}
  }
  const videos = [];
  document.querySelectorAll('video, video source').forEach(el => {
    const src = el.currentSrc || el.src || el.getAttribute('src');
    if (src) videos.push(src);
  });
  const lazy = [];
  document.querySelectorAll('*').forEach(el => {
    for (const attr of el.getAttributeNames()) {
      if (attr === 'data-src' || attr === 'data-original' || attr.startsWith('data-lazy')) {
        const v = el.getAttribute(attr);
        if (v) lazy.push(v);
      }
    }
  });
  return { scriptUrls, stateUrls, videos, lazy };
})()"#;

/// Samples computed colors and font stacks across every element.
const COMPUTED_STYLES_SCRIPT: &str = r#"(() => {
  const transparent = v => !v || v === 'transparent' || /^rgba\(.*[,\/]\s*0(?:\.0+)?\s*\)$/.test(v);
  const colors = new Map();
  const fonts = new Set();
  const add = v => { if (!transparent(v)) colors.set(v, (colors.get(v) || 0) + 1); };
  for (const el of document.querySelectorAll('*')) {
    const cs = window.getComputedStyle(el);
    add(cs.color);
    add(cs.backgroundColor);
    for (const side of ['Top', 'Right', 'Bottom', 'Left']) add(cs['border' + side + 'Color']);
    if (cs.fontFamily) fonts.add(cs.fontFamily);
  }
  return { colors: Array.from(colors.entries()), fonts: Array.from(fonts) };
})()"#;

/// One rung of the fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationStrategy {
    pub wait: WaitStrategy,
    pub timeout: Duration,
    /// Wait after this strategy succeeds, before the common settle delay.
    pub settle: Duration,
}

impl NavigationStrategy {
    /// Network idle, then DOM ready, then `load`.
    pub fn chain(config: &ExtractorConfig) -> Vec<Self> {
        vec![
            Self {
                wait: WaitStrategy::NetworkIdle,
                timeout: config.network_idle_timeout,
                settle: Duration::ZERO,
            },
            Self {
                wait: WaitStrategy::DomContentLoaded,
                timeout: config.dom_ready_timeout,
                settle: config.dom_ready_settle,
            },
            Self {
                wait: WaitStrategy::Load,
                timeout: config.load_timeout,
                settle: config.load_settle,
            },
        ]
    }
}

/// Resources the discovery script found in the live page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveredResources {
    /// Media URLs embedded in inline script text.
    pub script_urls: Vec<String>,
    /// Media URLs inside global state blobs.
    pub state_urls: Vec<String>,
    pub videos: Vec<String>,
    /// Values of lazy-load data attributes.
    pub lazy: Vec<String>,
}

impl DiscoveredResources {
    pub fn total(&self) -> usize {
        self.script_urls.len() + self.state_urls.len() + self.videos.len() + self.lazy.len()
    }
}

/// Computed style samples from the rendered page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputedStyles {
    /// Distinct computed color values with the number of occurrences.
    pub colors: Vec<(String, u64)>,
    /// Distinct computed `font-family` stacks.
    pub fonts: Vec<String>,
}

/// Everything later stages need from the acquired page.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    /// The requested URL.
    pub url: String,
    /// URL after redirects; base for relative references.
    pub final_url: String,
    pub html: String,
    pub observed: Vec<ObservedResource>,
    pub discovered: DiscoveredResources,
    pub computed: ComputedStyles,
    /// False when the plain HTTP fallback produced the markup.
    pub rendered: bool,
}

/// Failure of one rendering attempt.
#[derive(Debug)]
enum AttemptError {
    /// Navigation error or timeout; the next strategy may succeed.
    Retryable(anyhow::Error),
    /// The renderer cannot produce contexts at all.
    Fatal(anyhow::Error),
}

/// Fetches and renders a target URL.
pub struct PageAcquirer {
    renderer: Arc<dyn Renderer>,
    http: HttpClient,
    config: Arc<ExtractorConfig>,
}

impl PageAcquirer {
    pub fn new(renderer: Arc<dyn Renderer>, http: HttpClient, config: Arc<ExtractorConfig>) -> Self {
        Self {
            renderer,
            http,
            config,
        }
    }

    /// Acquire `url`, rendering if possible and falling back to plain GET.
    pub async fn acquire(
        &self,
        url: &str,
        progress: &Option<ProgressSender>,
    ) -> ExtractResult<PageSnapshot> {
        emit(progress, ProgressStage::FetchingPage, json!({ "url": url }));

        let snapshot = match self.render(url, progress).await {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                warn!("rendering {url} failed, falling back to HTTP: {reason:#}");
                self.fetch_plain(url, progress).await?
            }
        };

        emit(
            progress,
            ProgressStage::PageFetchComplete,
            json!({
                "url": snapshot.final_url,
                "rendered": snapshot.rendered,
                "html_bytes": snapshot.html.len(),
                "observed": snapshot.observed.len(),
            }),
        );
        Ok(snapshot)
    }

    /// Walk the strategy chain until one attempt succeeds.
    async fn render(
        &self,
        url: &str,
        progress: &Option<ProgressSender>,
    ) -> anyhow::Result<PageSnapshot> {
        let mut last_error = anyhow::anyhow!("no navigation strategies configured");

        for strategy in NavigationStrategy::chain(&self.config) {
            emit(
                progress,
                ProgressStage::LoadingPage,
                json!({
                    "strategy": strategy.wait.name(),
                    "timeout_ms": strategy.timeout.as_millis() as u64,
                }),
            );

            match self.attempt(url, strategy, progress).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(AttemptError::Retryable(e)) => {
                    warn!("{} navigation of {url} failed: {e:#}", strategy.wait);
                    emit(
                        progress,
                        ProgressStage::PageFetchError,
                        json!({ "strategy": strategy.wait.name(), "error": format!("{e:#}") }),
                    );
                    last_error = e;
                }
                Err(AttemptError::Fatal(e)) => {
                    emit(
                        progress,
                        ProgressStage::PageFetchError,
                        json!({ "strategy": strategy.wait.name(), "error": format!("{e:#}") }),
                    );
                    return Err(e);
                }
            }
        }

        Err(last_error)
    }

    /// One navigation in a fresh context. The context is always closed.
    async fn attempt(
        &self,
        url: &str,
        strategy: NavigationStrategy,
        progress: &Option<ProgressSender>,
    ) -> Result<PageSnapshot, AttemptError> {
        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(AttemptError::Fatal)?;

        let result = self.navigate_and_capture(ctx.as_mut(), url, strategy, progress).await;
        if let Err(e) = ctx.close().await {
            debug!("closing render context failed: {e:#}");
        }
        result.map_err(AttemptError::Retryable)
    }

    async fn navigate_and_capture(
        &self,
        ctx: &mut dyn RenderContext,
        url: &str,
        strategy: NavigationStrategy,
        progress: &Option<ProgressSender>,
    ) -> anyhow::Result<PageSnapshot> {
        let nav = ctx.navigate(url, strategy.wait, strategy.timeout).await?;
        emit(
            progress,
            ProgressStage::PageLoaded,
            json!({
                "strategy": strategy.wait.name(),
                "url": nav.final_url,
                "load_time_ms": nav.load_time_ms,
            }),
        );
        info!(
            "loaded {url} via {} in {}ms",
            strategy.wait, nav.load_time_ms
        );

        tokio::time::sleep(strategy.settle + self.config.post_navigation_settle).await;

        let html = ctx.get_html().await?;
        let final_url = match ctx.get_url().await {
            Ok(u) if !u.is_empty() && u != "about:blank" => u,
            _ => nav.final_url.clone(),
        };

        emit(progress, ProgressStage::ExtractingJsResources, json!({}));
        let discovered: DiscoveredResources = match ctx.execute_js(DISCOVERY_SCRIPT).await {
            Ok(v) => serde_json::from_value(v).unwrap_or_default(),
            Err(e) => {
                debug!("discovery script failed on {url}: {e:#}");
                DiscoveredResources::default()
            }
        };
        emit(
            progress,
            ProgressStage::ResourceLoaded,
            json!({ "count": discovered.total() }),
        );

        let computed: ComputedStyles = match ctx.execute_js(COMPUTED_STYLES_SCRIPT).await {
            Ok(v) => serde_json::from_value(v).unwrap_or_default(),
            Err(e) => {
                debug!("computed style sampling failed on {url}: {e:#}");
                ComputedStyles::default()
            }
        };

        let observed = ctx.observed_resources().await;
        emit(
            progress,
            ProgressStage::ParsingContent,
            json!({ "html_bytes": html.len() }),
        );

        Ok(PageSnapshot {
            url: url.to_string(),
            final_url,
            html,
            observed,
            discovered,
            computed,
            rendered: true,
        })
    }

    /// Plain GET fallback.
    async fn fetch_plain(
        &self,
        url: &str,
        progress: &Option<ProgressSender>,
    ) -> ExtractResult<PageSnapshot> {
        let timeout = self.config.http_fallback_timeout;
        emit(
            progress,
            ProgressStage::FallbackRequest,
            json!({ "url": url, "timeout_ms": timeout.as_millis() as u64 }),
        );

        let outcome = match self.http.get(url, timeout).await {
            Ok(resp) if resp.is_success() => Ok(resp),
            Ok(resp) => Err(format!("HTTP status {}", resp.status)),
            Err(e) => Err(format!("{e:#}")),
        };

        match outcome {
            Ok(resp) => {
                emit(
                    progress,
                    ProgressStage::FallbackComplete,
                    json!({ "status": resp.status, "bytes": resp.body.len() }),
                );
                let html = resp.text();
                emit(
                    progress,
                    ProgressStage::ParsingContent,
                    json!({ "html_bytes": html.len() }),
                );
                Ok(PageSnapshot {
                    url: url.to_string(),
                    final_url: resp.final_url,
                    html,
                    rendered: false,
                    ..Default::default()
                })
            }
            Err(reason) => {
                warn!("HTTP fallback for {url} failed: {reason}");
                emit(
                    progress,
                    ProgressStage::FallbackFailed,
                    json!({ "error": reason }),
                );
                Err(ExtractError::FetchFailure(format!("{url}: {reason}")))
            }
        }
    }
}
