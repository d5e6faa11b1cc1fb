//! Asset discovery: observed responses, static markup, discovery-script
//! results and inline SVG, merged into deduplicated lists.

use crate::acquire::PageSnapshot;
use crate::config::ExtractorConfig;
use crate::dedup::StringSet;
use crate::http_client::HttpClient;
use crate::progress::{emit, ProgressSender, ProgressStage};
use crate::renderer::ObservedResource;
use crate::svg::{self, SvgKind};
use crate::types::{AssetCollection, ExtractError};
use crate::url_norm;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "ogv", "ogg", "mov", "m4v", "m3u8"];

/// Iframe hosts whose embeds are videos.
const VIDEO_EMBED_PATTERNS: &[&str] = &[
    "youtube.com/embed/",
    "youtube-nocookie.com/embed/",
    "player.vimeo.com/video/",
    "dailymotion.com/embed/",
    "fast.wistia.net/embed/",
    "loom.com/embed/",
];

/// Which list a reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Image,
    Video,
    Script,
    Stylesheet,
    Svg,
}

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'"()]+?)['"]?\s*\)"#).expect("valid regex")
    })
}

/// `background: url(..)` / `backgroundImage: "url(..)"` inside script text.
fn script_background_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)background(?:-image|image)?["']?\s*[:=]\s*["'`]?[^;"'`]*?url\(\s*\\?['"]?([^'"()\\]+?)\\?['"]?\s*\)"#,
        )
        .expect("valid regex")
    })
}

fn select<'a>(doc: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(sel) => doc.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn is_lazy_attr(name: &str) -> bool {
    name == "data-src" || name == "data-original" || name.starts_with("data-lazy")
}

/// Classify a captured network response by content type, then engine type.
fn classify_observed(resource: &ObservedResource) -> Option<Category> {
    let ct = resource.content_type.to_ascii_lowercase();
    let rt = resource.resource_type.as_str();

    if ct.contains("svg") || url_norm::is_svg_url(&resource.url) {
        Some(Category::Svg)
    } else if ct.starts_with("image/") || rt == "image" {
        Some(Category::Image)
    } else if ct.starts_with("video/") || ct.starts_with("audio/") || rt == "media" {
        Some(Category::Video)
    } else if ct.contains("javascript") || ct.contains("ecmascript") || rt == "script" {
        Some(Category::Script)
    } else if ct.contains("text/css") || rt == "stylesheet" {
        Some(Category::Stylesheet)
    } else {
        None
    }
}

/// Category of a bare media URL, from its extension. Defaults to image.
fn classify_by_extension(url: &str) -> Category {
    match url_norm::extension(url) {
        Some(ext) if ext == "svg" => Category::Svg,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => Category::Video,
        _ => Category::Image,
    }
}

/// Asset lists under construction.
struct AssetsBuilder {
    base: String,
    images: StringSet,
    videos: StringSet,
    scripts: StringSet,
    stylesheets: StringSet,
    icons: StringSet,
    svgs: StringSet,
}

impl AssetsBuilder {
    fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            images: StringSet::strings(),
            videos: StringSet::strings(),
            scripts: StringSet::strings(),
            stylesheets: StringSet::strings(),
            icons: StringSet::strings(),
            svgs: StringSet::strings(),
        }
    }

    /// Normalize `raw` and file it. SVG URLs always go to `svgs`.
    fn add(&mut self, category: Category, raw: &str) {
        let Some(url) = url_norm::normalize(raw, &self.base) else {
            return;
        };
        let category = if category == Category::Image && url_norm::is_svg_url(&url) {
            Category::Svg
        } else {
            category
        };
        let set = match category {
            Category::Image => &mut self.images,
            Category::Video => &mut self.videos,
            Category::Script => &mut self.scripts,
            Category::Stylesheet => &mut self.stylesheets,
            Category::Svg => &mut self.svgs,
        };
        set.insert(url);
    }

    /// Normalize inline SVG markup and file it by classification.
    fn add_inline_svg(&mut self, markup: &str) {
        let normalized = svg::normalize(markup);
        match svg::classify(&normalized) {
            SvgKind::Icon => self.icons.insert(normalized),
            SvgKind::Illustration => self.svgs.insert(normalized),
        };
    }

    /// Absolute SVG URLs still waiting to be fetched.
    fn svg_urls(&self) -> Vec<String> {
        self.svgs
            .iter()
            .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
            .cloned()
            .collect()
    }

    /// Replace fetched SVG URLs by their markup, moving icons out of `svgs`.
    fn resolve_svgs(&mut self, fetched: &HashMap<String, String>) {
        let entries = std::mem::replace(&mut self.svgs, StringSet::strings()).into_vec();
        for entry in entries {
            match fetched.get(&entry) {
                Some(markup) => match svg::classify(markup) {
                    SvgKind::Icon => {
                        self.icons.insert(markup.clone());
                    }
                    SvgKind::Illustration => {
                        self.svgs.insert(markup.clone());
                    }
                },
                None => {
                    self.svgs.insert(entry);
                }
            }
        }
    }

    fn finish(self) -> AssetCollection {
        AssetCollection {
            images: self.images.into_vec(),
            videos: self.videos.into_vec(),
            scripts: self.scripts.into_vec(),
            stylesheets: self.stylesheets.into_vec(),
            icons: self.icons.into_vec(),
            svgs: self.svgs.into_vec(),
        }
    }
}

/// Everything that needs no network: observed responses, markup,
/// discovery results and inline SVG.
fn collect_local(page: &PageSnapshot) -> AssetsBuilder {
    let mut b = AssetsBuilder::new(&page.final_url);

    for resource in &page.observed {
        if let Some(category) = classify_observed(resource) {
            b.add(category, &resource.url);
        }
    }

    scan_markup(&page.html, &mut b);

    let d = &page.discovered;
    for url in d.script_urls.iter().chain(&d.state_urls).chain(&d.lazy) {
        b.add(classify_by_extension(url), url);
    }
    for url in &d.videos {
        b.add(Category::Video, url);
    }

    b
}

fn scan_markup(html: &str, b: &mut AssetsBuilder) {
    let doc = Html::parse_document(html);

    for img in select(&doc, "img[src]") {
        if let Some(src) = img.value().attr("src") {
            b.add(Category::Image, src);
        }
    }
    for el in select(&doc, "img[srcset], picture source[srcset]") {
        if let Some(srcset) = el.value().attr("srcset") {
            for candidate in srcset.split(',') {
                if let Some(url) = candidate.split_whitespace().next() {
                    b.add(Category::Image, url);
                }
            }
        }
    }
    for el in select(&doc, "*") {
        for (name, value) in el.value().attrs() {
            if is_lazy_attr(name) {
                b.add(classify_by_extension(value), value);
            }
        }
    }

    for video in select(&doc, "video") {
        if let Some(src) = video.value().attr("src") {
            b.add(Category::Video, src);
        }
        if let Some(poster) = video.value().attr("poster") {
            b.add(Category::Image, poster);
        }
    }
    for source in select(&doc, "video source[src]") {
        if let Some(src) = source.value().attr("src") {
            b.add(Category::Video, src);
        }
    }
    for iframe in select(&doc, "iframe[src]") {
        if let Some(src) = iframe.value().attr("src") {
            if VIDEO_EMBED_PATTERNS.iter().any(|p| src.contains(p)) {
                b.add(Category::Video, src);
            }
        }
    }

    for script in select(&doc, "script[src]") {
        if let Some(src) = script.value().attr("src") {
            b.add(Category::Script, src);
        }
    }
    for link in select(&doc, "link[href]") {
        let is_stylesheet = link
            .value()
            .attr("rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")));
        if is_stylesheet {
            if let Some(href) = link.value().attr("href") {
                b.add(Category::Stylesheet, href);
            }
        }
    }

    for el in select(&doc, "[style]") {
        if let Some(style) = el.value().attr("style") {
            for cap in css_url_re().captures_iter(style) {
                b.add(Category::Image, &cap[1]);
            }
        }
    }
    for script in select(&doc, "script:not([src])") {
        let text: String = script.text().collect();
        for cap in script_background_re().captures_iter(&text) {
            b.add(Category::Image, &cap[1]);
        }
    }

    for svg_el in select(&doc, "svg") {
        let nested = svg_el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| a.value().name() == "svg");
        if !nested {
            b.add_inline_svg(&svg_el.html());
        }
    }
}

/// Builds the page's [`AssetCollection`].
pub struct ResourceCollector {
    http: HttpClient,
    config: Arc<ExtractorConfig>,
}

impl ResourceCollector {
    pub fn new(http: HttpClient, config: Arc<ExtractorConfig>) -> Self {
        Self { http, config }
    }

    /// Collect assets from the snapshot and resolve external SVGs.
    pub async fn collect(
        &self,
        page: &PageSnapshot,
        progress: &Option<ProgressSender>,
    ) -> AssetCollection {
        emit(progress, ProgressStage::ExtractingAssets, json!({}));

        let mut builder = collect_local(page);

        let mut svg_urls = builder.svg_urls();
        svg_urls.truncate(self.config.max_external_svgs);
        emit(
            progress,
            ProgressStage::ProcessingResources,
            json!({ "observed": page.observed.len(), "svg_urls": svg_urls.len() }),
        );

        if !svg_urls.is_empty() {
            let fetched = self.fetch_svgs(&svg_urls).await;
            builder.resolve_svgs(&fetched);
        }

        let assets = builder.finish();
        emit(
            progress,
            ProgressStage::AssetsExtracted,
            json!({
                "images": assets.images.len(),
                "videos": assets.videos.len(),
                "scripts": assets.scripts.len(),
                "stylesheets": assets.stylesheets.len(),
                "icons": assets.icons.len(),
                "svgs": assets.svgs.len(),
            }),
        );
        assets
    }

    /// Fetch and normalize external SVGs. Failures are logged and skipped.
    async fn fetch_svgs(&self, urls: &[String]) -> HashMap<String, String> {
        let results = self
            .http
            .get_many(urls, self.config.fetch_concurrency, self.config.resource_timeout)
            .await;

        let mut fetched = HashMap::new();
        for (url, result) in results {
            match result {
                Ok(resp) => {
                    let text = resp.text();
                    if text.to_ascii_lowercase().contains("<svg") {
                        fetched.insert(url, svg::normalize(&text));
                    } else {
                        debug!("{url} did not contain SVG markup");
                    }
                }
                Err(e) => {
                    let err = ExtractError::PartialResource {
                        url,
                        reason: format!("{e:#}"),
                    };
                    warn!("{err}");
                }
            }
        }
        fetched
    }
}
