//! End-to-end extraction against a local site, with a scripted renderer
//! standing in for the browser.

use anyhow::{anyhow, Result};
use assetlens::renderer::{NavigationResult, ObservedResource, RenderContext};
use assetlens::{
    AssetExtractor, ExtractError, ExtractorConfig, FontKind, NoopRenderer, Renderer,
    StreamEvent, StreamFrame, WaitStrategy,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves fixed markup, failing the listed strategies.
struct ScriptedRenderer {
    html: String,
    final_url: String,
    failing: Vec<WaitStrategy>,
    contexts: AtomicUsize,
    hang: bool,
}

impl ScriptedRenderer {
    fn new(html: String, final_url: String) -> Self {
        Self {
            html,
            final_url,
            failing: vec![],
            contexts: AtomicUsize::new(0),
            hang: false,
        }
    }

    fn contexts_created(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }
}

struct ScriptedContext {
    html: String,
    final_url: String,
    failing: Vec<WaitStrategy>,
    hang: bool,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            html: self.html.clone(),
            final_url: self.final_url.clone(),
            failing: self.failing.clone(),
            hang: self.hang,
        }))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(
        &mut self,
        _url: &str,
        wait: WaitStrategy,
        _timeout: Duration,
    ) -> Result<NavigationResult> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.failing.contains(&wait) {
            return Err(anyhow!("Navigation timeout ({wait})"));
        }
        Ok(NavigationResult {
            final_url: self.final_url.clone(),
            load_time_ms: 7,
        })
    }
    async fn execute_js(&self, script: &str) -> Result<Value> {
        if script.contains("scriptUrls") {
            Ok(json!({ "scriptUrls": [], "stateUrls": [], "videos": [], "lazy": [] }))
        } else {
            Ok(json!({
                "colors": [["rgb(255, 0, 0)", 4], ["rgba(0, 0, 0, 0)", 9]],
                "fonts": ["\"Brand Sans\", Helvetica, sans-serif"],
            }))
        }
    }
    async fn get_html(&self) -> Result<String> {
        Ok(self.html.clone())
    }
    async fn get_url(&self) -> Result<String> {
        Ok(self.final_url.clone())
    }
    async fn observed_resources(&self) -> Vec<ObservedResource> {
        vec![ObservedResource {
            url: format!("{}app.js", self.final_url),
            resource_type: "script".to_string(),
            content_type: "application/javascript".to_string(),
        }]
    }
    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn config() -> ExtractorConfig {
    ExtractorConfig {
        network_idle_timeout: Duration::from_secs(2),
        dom_ready_timeout: Duration::from_secs(2),
        dom_ready_settle: Duration::ZERO,
        load_timeout: Duration::from_secs(2),
        load_settle: Duration::ZERO,
        post_navigation_settle: Duration::ZERO,
        http_fallback_timeout: Duration::from_secs(5),
        resource_timeout: Duration::from_secs(5),
        stream_poll_interval: Duration::from_millis(50),
        cached_replay_delay: Duration::from_millis(5),
        ..ExtractorConfig::default()
    }
}

fn solid_png(rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(32, 32, image::Rgb(rgb));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

fn illustration_svg() -> String {
    let paths: String = (0..12)
        .map(|i| format!("<path d=\"M0 0L{} {}\"/>", i * 40, i * 30))
        .collect();
    format!(r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 800 600">{paths}</svg>"#)
}

const PAGE: &str = r##"<!doctype html>
<html>
<head>
  <link rel="stylesheet" href="/site.css">
  <style>
    @font-face { font-family: "Brand Sans"; src: url(/fonts/brand.woff2); }
    body { font-family: "Brand Sans", Helvetica, sans-serif; color: #ff0000; }
  </style>
  <script src="/app.js"></script>
</head>
<body>
  <img src="/hero.png" alt="">
  <img src="/missing.jpg" alt="">
  <img src="/art.svg" alt="">
  <img src="/hero.png?utm=1" alt="">
  <video src="/intro.mp4"></video>
  <svg width="16" height="16" viewBox="0 0 16 16"><path d="M0 0h16v16H0z"/></svg>
  <p style="font-family: 'Quote Serif', serif">hi</p>
</body>
</html>"##;

const SITE_CSS: &str = r#"
h1 { color: #FF0000; background-color: rgb(0, 0, 255); }
.muted { color: transparent; }
@font-face { font-family: "Display Pro"; src: url("fonts/display.woff2"); }
h2 { font-family: Georgia, serif; }
"#;

/// A local site whose page markup is served by the renderer.
async fn site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/site.css"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SITE_CSS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hero.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(solid_png([30, 144, 255])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/art.svg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/svg+xml")
                .set_body_string(illustration_svg()),
        )
        .mount(&server)
        .await;
    server
}

fn page_url(server: &MockServer) -> String {
    format!("{}/", server.uri())
}

fn extractor(renderer: Arc<dyn Renderer>) -> AssetExtractor {
    AssetExtractor::in_memory(renderer, config())
}

async fn collect_events(extractor: &AssetExtractor, url: &str, force: bool) -> Vec<StreamEvent> {
    let (stream, _cancel) = extractor.stream(url, force).await;
    stream
        .filter_map(|frame| async move {
            match frame {
                StreamFrame::Event(e) => Some(e),
                StreamFrame::Keepalive => None,
            }
        })
        .collect()
        .await
}

#[tokio::test]
async fn test_full_extraction_invariants() {
    let server = site().await;
    let url = page_url(&server);
    let renderer = Arc::new(ScriptedRenderer::new(PAGE.to_string(), url.clone()));
    let result = extractor(renderer).extract(&url, false).await.unwrap();

    assert_eq!(result.url, url);
    assert!(!result.cached);
    assert!(result.result_id.is_some());

    // CSS colors: red from inline, external and computed; blue once.
    let css = &result.colors.from_css;
    assert_eq!(css[0].hex, "#ff0000");
    assert_eq!(css[0].count, Some(6));
    assert!(css.iter().any(|c| c.hex == "#0000ff"));
    assert!(css.windows(2).all(|w| w[0].count >= w[1].count));
    let hexes: HashSet<_> = css.iter().map(|c| c.hex.as_str()).collect();
    assert_eq!(hexes.len(), css.len());
    assert!(css.iter().all(|c| c.percentage.is_none()));

    // Image colors: only the decodable PNG contributes.
    let images = &result.colors.from_images;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].name, "dodgerblue");
    assert!(images[0]
        .rgb
        .iter()
        .zip([30u8, 144, 255])
        .all(|(got, want)| got.abs_diff(want) <= 1));
    assert_eq!(images[0].percentage, Some(100.0));
    assert!(images[0].source.as_deref().unwrap().ends_with("/hero.png"));

    // Fonts: unique by (name, kind), no generic families.
    let pairs: HashSet<_> = result.fonts.iter().map(|f| (f.name.clone(), f.kind)).collect();
    assert_eq!(pairs.len(), result.fonts.len());
    assert!(result.fonts.iter().all(|f| f.name != "sans-serif" && f.name != "serif"));
    assert!(pairs.contains(&("Brand Sans".to_string(), FontKind::FontFace)));
    assert!(pairs.contains(&("Quote Serif".to_string(), FontKind::Inline)));
    assert!(pairs.contains(&("Display Pro".to_string(), FontKind::FontFaceExternal)));
    assert!(pairs.contains(&("Georgia".to_string(), FontKind::Css)));
    assert!(pairs.contains(&("Helvetica".to_string(), FontKind::Computed)));
    let display = result
        .fonts
        .iter()
        .find(|f| f.name == "Display Pro")
        .unwrap();
    assert_eq!(
        display.url.as_deref(),
        Some(format!("{url}fonts/display.woff2").as_str())
    );

    // Assets: normalized and deduplicated.
    let assets = &result.assets;
    assert_eq!(
        assets.images.iter().filter(|i| i.ends_with("/hero.png")).count(),
        1
    );
    assert!(assets.images.iter().all(|i| !i.contains("utm=")));
    assert!(assets.images.iter().all(|i| !i.ends_with(".svg")));
    assert_eq!(assets.scripts, vec![format!("{url}app.js")]);
    assert_eq!(assets.stylesheets, vec![format!("{url}site.css")]);
    assert_eq!(assets.videos, vec![format!("{url}intro.mp4")]);

    // SVGs: the inline glyph is an icon, the fetched artwork an illustration.
    assert_eq!(assets.icons.len(), 1);
    assert!(assets.icons[0].starts_with("<svg"));
    assert_eq!(assets.svgs.len(), 1);
    assert!(assets.svgs[0].starts_with("<svg"));
    assert!(assets.svgs[0].contains("viewBox=\"0 0 800 600\""));
}

#[tokio::test]
async fn test_fallback_strategy_is_reported() {
    let server = site().await;
    let url = page_url(&server);
    let mut renderer = ScriptedRenderer::new(PAGE.to_string(), url.clone());
    renderer.failing = vec![WaitStrategy::NetworkIdle];
    let extractor = extractor(Arc::new(renderer));

    let events = collect_events(&extractor, &url, false).await;
    let strategies: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress(p) if p.stage.as_str() == "loading_page" => {
                p.data["strategy"].as_str().map(str::to_string)
            }
            _ => None,
        })
        .collect();
    assert_eq!(strategies, vec!["networkidle", "domcontentloaded"]);

    let n = events.len();
    assert!(matches!(events[0], StreamEvent::Start { .. }));
    assert!(matches!(events[n - 2], StreamEvent::Complete { .. }));
    assert_eq!(events[n - 1], StreamEvent::End);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let server = site().await;
    let url = page_url(&server);
    let renderer = Arc::new(ScriptedRenderer::new(PAGE.to_string(), url.clone()));
    let extractor = extractor(renderer.clone());

    let first = extractor.extract(&url, false).await.unwrap();
    let second = extractor.extract(&url, false).await.unwrap();
    assert_eq!(renderer.contexts_created(), 1);
    assert!(second.cached);
    assert_eq!(first.result_id, second.result_id);
    assert_eq!(first.colors, second.colors);
    assert_eq!(first.assets, second.assets);

    let events = collect_events(&extractor, &url, false).await;
    assert_eq!(renderer.contexts_created(), 1);
    assert!(matches!(&events[1], StreamEvent::CachedResult { result_id } if *result_id == first.result_id));
    match &events[2] {
        StreamEvent::Complete { result } => assert!(result.cached),
        other => panic!("expected complete, got {other:?}"),
    }

    let refreshed = extractor.extract(&url, true).await.unwrap();
    assert_eq!(renderer.contexts_created(), 2);
    assert!(!refreshed.cached);
    assert_ne!(refreshed.result_id, first.result_id);
}

#[tokio::test]
async fn test_round_trip_by_id_and_listing() {
    let server = site().await;
    let url = page_url(&server);
    let renderer = Arc::new(ScriptedRenderer::new(PAGE.to_string(), url.clone()));
    let extractor = extractor(renderer);

    let stored = extractor.extract(&url, false).await.unwrap();
    let id = stored.result_id.clone().unwrap();
    let fetched = extractor.cached(&id).await.unwrap();
    assert!(fetched.cached);
    assert_eq!(fetched.url, stored.url);
    assert_eq!(fetched.fonts, stored.fonts);

    let listing = extractor.list_cached(10, 0).await.unwrap();
    assert_eq!(listing.total, 1);
    assert_eq!(listing.results[0].id, id);
    assert_eq!(listing.results[0].url, url);

    assert!(matches!(
        extractor.cached("does-not-exist").await,
        Err(ExtractError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_url_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let renderer = Arc::new(ScriptedRenderer::new(String::new(), page_url(&server)));
    let extractor = extractor(renderer.clone());

    assert!(matches!(
        extractor.extract("not a url", false).await,
        Err(ExtractError::InvalidUrl(_))
    ));
    assert!(matches!(
        extractor.extract("ftp://example.com/file", false).await,
        Err(ExtractError::InvalidUrl(_))
    ));

    let events = collect_events(&extractor, "", false).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::Error {
                message: "Missing URL parameter".to_string()
            },
            StreamEvent::End
        ]
    );
    let events = collect_events(&extractor, "javascript:alert(1)", false).await;
    assert_eq!(
        events[0],
        StreamEvent::Error {
            message: "Invalid URL format".to_string()
        }
    );
    assert_eq!(renderer.contexts_created(), 0);
}

#[tokio::test]
async fn test_http_only_mode_and_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><img src="/a.webp"><img src="/a.webp"></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    let extractor = extractor(Arc::new(NoopRenderer));

    let result = extractor.extract(&page_url(&server), false).await.unwrap();
    assert_eq!(result.assets.images, vec![format!("{}/a.webp", server.uri())]);
    assert!(result.colors.from_images.is_empty());

    let events = collect_events(&extractor, &format!("{}/gone", server.uri()), false).await;
    let stages: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress(p) => Some(p.stage.as_str()),
            _ => None,
        })
        .collect();
    assert!(stages.contains(&"fallback_request"));
    assert!(stages.contains(&"fallback_failed"));
    assert_eq!(stages.last(), Some(&"extraction_failed"));
    let n = events.len();
    assert!(matches!(&events[n - 2], StreamEvent::Error { message } if message.contains("410")));
    assert_eq!(events[n - 1], StreamEvent::End);
}

#[tokio::test]
async fn test_cancel_ends_stream() {
    let server = site().await;
    let url = page_url(&server);
    let mut renderer = ScriptedRenderer::new(PAGE.to_string(), url.clone());
    renderer.hang = true;
    let extractor = extractor(Arc::new(renderer));

    let (mut stream, cancel) = extractor.stream(&url, false).await;
    let mut events = Vec::new();
    while let Some(frame) = stream.next().await {
        if let StreamFrame::Event(event) = frame {
            if matches!(event, StreamEvent::Progress(_)) {
                cancel.cancel();
            }
            events.push(event);
        }
    }

    let n = events.len();
    assert_eq!(events[n - 2], StreamEvent::Cancelled);
    assert_eq!(events[n - 1], StreamEvent::End);
    assert!(extractor.list_cached(10, 0).await.unwrap().results.is_empty());
}
