//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, ObservedResource, RenderContext, Renderer, WaitStrategy};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Quiet window that counts as network idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const POLL_STEP: Duration = Duration::from_millis(100);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. ASSETLENS_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("ASSETLENS_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.assetlens/chromium/
    if let Some(home) = dirs::home_dir() {
        let root = home.join(".assetlens/chromium");
        let candidates = if cfg!(target_os = "macos") {
            vec![
                root.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome"),
            ]
        } else {
            vec![root.join("chrome-linux64/chrome"), root.join("chrome")]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 3. System PATH
    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|bin| which::which(bin).ok())
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn new() -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set ASSETLENS_CHROMIUM_PATH or install Chrome.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--window-size=1920,1080")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        let observed = Arc::new(Mutex::new(Vec::new()));
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to attach response observer")?;

        let sink = Arc::clone(&observed);
        let observer = tokio::spawn(async move {
            while let Some(ev) = responses.next().await {
                let resp = &ev.response;
                if resp.url.starts_with("data:") || resp.status >= 400 {
                    continue;
                }
                let record = ObservedResource {
                    url: resp.url.clone(),
                    resource_type: format!("{:?}", ev.r#type).to_ascii_lowercase(),
                    content_type: resp.mime_type.clone(),
                };
                if let Ok(mut list) = sink.lock() {
                    list.push(record);
                }
            }
        });

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            observed,
            observer,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.handler.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    observed: Arc<Mutex<Vec<ObservedResource>>>,
    observer: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    fn observed_len(&self) -> usize {
        self.observed.lock().map(|l| l.len()).unwrap_or(0)
    }

    async fn wait_ready_state(&self, deadline: Instant) -> Result<()> {
        loop {
            let state = self
                .page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|r| r.into_value::<String>().ok());
            if matches!(state.as_deref(), Some("interactive" | "complete")) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("timed out waiting for DOMContentLoaded");
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    async fn wait_network_quiet(&self, deadline: Instant) -> Result<()> {
        let mut last = self.observed_len();
        let mut quiet_since = Instant::now();
        loop {
            if quiet_since.elapsed() >= NETWORK_QUIET {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("timed out waiting for network idle");
            }
            tokio::time::sleep(POLL_STEP).await;
            let now = self.observed_len();
            if now != last {
                last = now;
                quiet_since = Instant::now();
            }
        }
    }

    async fn current_url(&self, fallback: &str) -> String {
        self.page
            .url()
            .await
            .ok()
            .flatten()
            .map(|u| u.to_string())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> Result<NavigationResult> {
        let start = Instant::now();
        let deadline = start + timeout;

        match wait {
            WaitStrategy::DomContentLoaded => {
                // Issue the navigation without waiting for `load`.
                let sent =
                    tokio::time::timeout(timeout, self.page.execute(NavigateParams::new(url)))
                        .await;
                match sent {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => bail!("navigation failed: {e}"),
                    Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
                }
                self.wait_ready_state(deadline).await?;
            }
            WaitStrategy::Load | WaitStrategy::NetworkIdle => {
                match tokio::time::timeout(timeout, self.page.goto(url)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => bail!("navigation failed: {e}"),
                    Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
                }
                if wait == WaitStrategy::NetworkIdle {
                    self.wait_network_quiet(deadline).await?;
                }
            }
        }

        Ok(NavigationResult {
            final_url: self.current_url(url).await,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn observed_resources(&self) -> Vec<ObservedResource> {
        self.observed.lock().map(|l| l.clone()).unwrap_or_default()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        self.observer.abort();
        let _ = self.page.close().await;
        Ok(())
    }
}
