//! Extractor configuration: every timeout and bound used by the pipeline.

use std::time::Duration;

/// Tunable limits for one extractor instance.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Navigation timeout when waiting for network quiescence.
    pub network_idle_timeout: Duration,
    /// Navigation timeout when waiting for DOMContentLoaded.
    pub dom_ready_timeout: Duration,
    pub dom_ready_settle: Duration,
    /// Navigation timeout when waiting for the `load` event.
    pub load_timeout: Duration,
    pub load_settle: Duration,
    /// Extra wait after any successful navigation.
    pub post_navigation_settle: Duration,
    /// Timeout for the plain-GET fallback.
    pub http_fallback_timeout: Duration,
    /// Timeout for each stylesheet, image or SVG fetch.
    pub resource_timeout: Duration,
    /// How many images are sampled for dominant colors.
    pub max_sampled_images: usize,
    /// Thumbnail edge in pixels before color clustering.
    pub thumbnail_size: u32,
    /// CIE76 distance under which two pixel colors join a cluster.
    pub color_tolerance: f32,
    /// Dominant colors kept per image.
    pub max_colors_per_image: usize,
    pub max_stylesheets: usize,
    pub max_external_svgs: usize,
    /// Concurrent per-resource fetches.
    pub fetch_concurrency: usize,
    pub cache_ttl: Duration,
    /// Consumer wait before emitting a keepalive.
    pub stream_poll_interval: Duration,
    /// Delay between `cached_result` and `complete` on a cache hit.
    pub cached_replay_delay: Duration,
    pub user_agent: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            network_idle_timeout: Duration::from_secs(45),
            dom_ready_timeout: Duration::from_secs(30),
            dom_ready_settle: Duration::from_secs(5),
            load_timeout: Duration::from_secs(20),
            load_settle: Duration::from_secs(3),
            post_navigation_settle: Duration::from_secs(2),
            http_fallback_timeout: Duration::from_secs(30),
            resource_timeout: Duration::from_secs(10),
            max_sampled_images: 5,
            thumbnail_size: 150,
            color_tolerance: 12.0,
            max_colors_per_image: 5,
            max_stylesheets: 20,
            max_external_svgs: 20,
            fetch_concurrency: 6,
            cache_ttl: Duration::from_secs(12 * 60 * 60),
            stream_poll_interval: Duration::from_millis(500),
            cached_replay_delay: Duration::from_millis(500),
            user_agent: crate::http_client::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ExtractorConfig {
    /// Defaults overridden by `ASSETLENS_*` environment variables.
    ///
    /// Durations are read as (fractional) seconds, bounds as counts.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let secs = |key: &str, slot: &mut Duration| {
            if let Some(v) = lookup(key).and_then(|s| s.trim().parse::<f64>().ok()) {
                if v.is_finite() && v >= 0.0 {
                    *slot = Duration::from_secs_f64(v);
                }
            }
        };
        secs("ASSETLENS_NETWORK_IDLE_TIMEOUT", &mut cfg.network_idle_timeout);
        secs("ASSETLENS_DOM_READY_TIMEOUT", &mut cfg.dom_ready_timeout);
        secs("ASSETLENS_DOM_READY_SETTLE", &mut cfg.dom_ready_settle);
        secs("ASSETLENS_LOAD_TIMEOUT", &mut cfg.load_timeout);
        secs("ASSETLENS_LOAD_SETTLE", &mut cfg.load_settle);
        secs("ASSETLENS_POST_NAV_SETTLE", &mut cfg.post_navigation_settle);
        secs("ASSETLENS_HTTP_TIMEOUT", &mut cfg.http_fallback_timeout);
        secs("ASSETLENS_RESOURCE_TIMEOUT", &mut cfg.resource_timeout);
        secs("ASSETLENS_CACHE_TTL", &mut cfg.cache_ttl);
        secs("ASSETLENS_STREAM_POLL", &mut cfg.stream_poll_interval);
        secs("ASSETLENS_CACHED_REPLAY_DELAY", &mut cfg.cached_replay_delay);

        let count = |key: &str, slot: &mut usize| {
            if let Some(v) = lookup(key).and_then(|s| s.trim().parse::<usize>().ok()) {
                *slot = v;
            }
        };
        count("ASSETLENS_MAX_IMAGES", &mut cfg.max_sampled_images);
        count("ASSETLENS_MAX_COLORS_PER_IMAGE", &mut cfg.max_colors_per_image);
        count("ASSETLENS_MAX_STYLESHEETS", &mut cfg.max_stylesheets);
        count("ASSETLENS_MAX_SVGS", &mut cfg.max_external_svgs);
        count("ASSETLENS_FETCH_CONCURRENCY", &mut cfg.fetch_concurrency);

        if let Some(v) = lookup("ASSETLENS_THUMBNAIL_SIZE").and_then(|s| s.trim().parse().ok()) {
            cfg.thumbnail_size = v;
        }
        if let Some(v) = lookup("ASSETLENS_COLOR_TOLERANCE").and_then(|s| s.trim().parse().ok()) {
            cfg.color_tolerance = v;
        }
        if let Some(ua) = lookup("ASSETLENS_USER_AGENT").filter(|s| !s.trim().is_empty()) {
            cfg.user_agent = ua;
        }

        cfg
    }
}
