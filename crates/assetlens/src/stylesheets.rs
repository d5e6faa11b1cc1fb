//! CSS text shared by the color and font extractors.
//!
//! `<style>` blocks come from the page markup; external stylesheets are
//! fetched once per extraction, capped, and failures are skipped.

use crate::config::ExtractorConfig;
use crate::http_client::HttpClient;
use crate::types::ExtractError;
use scraper::{Html, Selector};
use tracing::{debug, warn};

/// A fetched external stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stylesheet {
    pub url: String,
    pub text: String,
}

/// All CSS text known for a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSources {
    /// Contents of inline `<style>` elements, in document order.
    pub inline: Vec<String>,
    pub external: Vec<Stylesheet>,
}

/// Text of every `<style>` element.
pub fn inline_style_blocks(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(sel) = Selector::parse("style") else {
        return Vec::new();
    };
    doc.select(&sel)
        .map(|el| el.text().collect::<String>())
        .filter(|css| !css.trim().is_empty())
        .collect()
}

/// Gather inline blocks and fetch up to `max_stylesheets` external sheets.
pub async fn load(
    html: &str,
    stylesheet_urls: &[String],
    http: &HttpClient,
    config: &ExtractorConfig,
) -> StyleSources {
    let inline = inline_style_blocks(html);

    let urls: Vec<String> = stylesheet_urls
        .iter()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .take(config.max_stylesheets)
        .cloned()
        .collect();

    let mut external = Vec::with_capacity(urls.len());
    for (url, result) in http
        .get_many(&urls, config.fetch_concurrency, config.resource_timeout)
        .await
    {
        match result {
            Ok(resp) => external.push(Stylesheet {
                url,
                text: resp.text(),
            }),
            Err(e) => {
                let err = ExtractError::PartialResource {
                    url,
                    reason: format!("{e:#}"),
                };
                warn!("{err}");
            }
        }
    }

    debug!(
        "loaded {} inline style blocks and {}/{} stylesheets",
        inline.len(),
        external.len(),
        urls.len()
    );

    StyleSources { inline, external }
}
