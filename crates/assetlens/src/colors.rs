//! Color extraction from CSS text, computed styles and image pixels.

use crate::acquire::ComputedStyles;
use crate::color_names::{nearest_name, to_hex};
use crate::config::ExtractorConfig;
use crate::dedup::OrderedSet;
use crate::http_client::HttpClient;
use crate::progress::{emit, ProgressSender, ProgressStage};
use crate::stylesheets::StyleSources;
use crate::types::{ColorCollection, ColorInfo, ExtractError};
use image::RgbImage;
use lab::Lab;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Near-white/near-black clusters survive only above this coverage.
const EXTREME_KEEP_PERCENT: f64 = 80.0;

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"))
}

/// Innermost `{ ... }` bodies, i.e. declaration blocks.
fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("valid regex"))
}

fn color_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)#(?:[0-9a-f]{6}|[0-9a-f]{3})\b|rgba?\(\s*\d{1,3}\s*[,\s]\s*\d{1,3}\s*[,\s]\s*\d{1,3}\s*(?:[,/]\s*[\d.]+%?\s*)?\)",
        )
        .expect("valid regex")
    })
}

fn rgb_parts_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)rgba?\(\s*(\d{1,3})\s*[,\s]\s*(\d{1,3})\s*[,\s]\s*(\d{1,3})\s*(?:[,/]\s*([\d.]+)%?\s*)?\)",
        )
        .expect("valid regex")
    })
}

/// Parse a hex or `rgb()`/`rgba()` literal. Fully transparent values and
/// out-of-range channels yield `None`.
pub fn parse_color(literal: &str) -> Option<[u8; 3]> {
    let literal = literal.trim();
    if let Some(hex) = literal.strip_prefix('#') {
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_string(),
            _ => return None,
        };
        let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
        return Some([channel(0)?, channel(2)?, channel(4)?]);
    }

    let caps = rgb_parts_re().captures(literal)?;
    let channel = |i: usize| caps[i].parse::<u8>().ok();
    let rgb = [channel(1)?, channel(2)?, channel(3)?];

    if let Some(alpha) = caps.get(4) {
        let value: f64 = alpha.as_str().parse().ok()?;
        if value == 0.0 {
            return None;
        }
    }
    Some(rgb)
}

/// Color literals in `color`/`background*` declarations of a stylesheet.
pub fn css_color_literals(css: &str) -> Vec<String> {
    let css = comment_re().replace_all(css, "");
    let mut out = Vec::new();
    for block in block_re().captures_iter(&css) {
        for decl in block[1].split(';') {
            let Some((prop, value)) = decl.split_once(':') else {
                continue;
            };
            let prop = prop.trim().to_ascii_lowercase();
            if !(prop.contains("color") || prop.contains("background")) {
                continue;
            }
            out.extend(
                color_token_re()
                    .find_iter(value)
                    .map(|m| m.as_str().to_string()),
            );
        }
    }
    out
}

/// Tally literals from CSS text and computed styles into named colors,
/// unique by hex and sorted by descending count.
pub fn css_colors(sources: &StyleSources, computed: &ComputedStyles) -> Vec<ColorInfo> {
    // Keyed by the raw literal text, first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut tally: HashMap<String, u64> = HashMap::new();
    let mut bump = |literal: String, n: u64| {
        let slot = tally.entry(literal.clone()).or_insert_with(|| {
            order.push(literal);
            0
        });
        *slot += n;
    };

    let sheets = sources
        .inline
        .iter()
        .map(String::as_str)
        .chain(sources.external.iter().map(|s| s.text.as_str()));
    for css in sheets {
        for literal in css_color_literals(css) {
            bump(literal, 1);
        }
    }
    for (value, count) in &computed.colors {
        for m in color_token_re().find_iter(value) {
            bump(m.as_str().to_string(), *count);
        }
    }

    let mut by_hex: OrderedSet<ColorInfo, String> = OrderedSet::new(|c: &ColorInfo| c.hex.clone());
    let mut merged: HashMap<String, u64> = HashMap::new();
    for literal in order {
        let Some(rgb) = parse_color(&literal) else {
            continue;
        };
        let count = tally.get(&literal).copied().unwrap_or(0);
        let named = nearest_name(rgb);
        *merged.entry(named.hex.clone()).or_insert(0) += count;
        by_hex.insert(ColorInfo {
            name: named.name.to_string(),
            hex: named.hex,
            rgb,
            count: None,
            percentage: None,
            source: None,
        });
    }

    let mut colors: Vec<ColorInfo> = by_hex
        .into_vec()
        .into_iter()
        .map(|mut c| {
            c.count = merged.get(&c.hex).copied();
            c
        })
        .collect();
    colors.sort_by(|a, b| b.count.cmp(&a.count));
    colors
}

fn is_extreme(rgb: [u8; 3]) -> bool {
    rgb.iter().all(|&c| c > 240) || rgb.iter().all(|&c| c < 15)
}

fn delta_e(a: &Lab, b: &Lab) -> f32 {
    ((a.l - b.l).powi(2) + (a.a - b.a).powi(2) + (a.b - b.b).powi(2)).sqrt()
}

/// Dominant colors of an image as `(color, pixel_count)` pairs.
///
/// Exact colors are visited from most to least frequent; each joins the
/// first cluster within `tolerance` (CIE76) of its seed or starts a new one.
/// Near-white and near-black clusters are dropped unless they dominate.
pub fn dominant_colors(img: &RgbImage, tolerance: f32, limit: usize) -> Vec<([u8; 3], u64)> {
    let total = u64::from(img.width()) * u64::from(img.height());
    if total == 0 {
        return Vec::new();
    }

    let mut exact: HashMap<[u8; 3], u64> = HashMap::new();
    for px in img.pixels() {
        *exact.entry(px.0).or_insert(0) += 1;
    }
    let mut exact: Vec<([u8; 3], u64)> = exact.into_iter().collect();
    // Ties broken by value so the result is deterministic.
    exact.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut clusters: Vec<([u8; 3], Lab, u64)> = Vec::new();
    for (rgb, count) in exact {
        let lab = Lab::from_rgb(&rgb);
        match clusters
            .iter_mut()
            .find(|(_, seed, _)| delta_e(seed, &lab) <= tolerance)
        {
            Some(cluster) => cluster.2 += count,
            None => clusters.push((rgb, lab, count)),
        }
    }

    clusters.sort_by(|a, b| b.2.cmp(&a.2));
    clusters
        .into_iter()
        .filter(|(rgb, _, count)| {
            !is_extreme(*rgb) || (*count as f64 / total as f64) * 100.0 > EXTREME_KEEP_PERCENT
        })
        .take(limit)
        .map(|(rgb, _, count)| (rgb, count))
        .collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Decode, downsample and cluster one image.
fn sample_image(
    bytes: &[u8],
    source: &str,
    config: &ExtractorConfig,
) -> Result<Vec<ColorInfo>, image::ImageError> {
    let img = image::load_from_memory(bytes)?
        .thumbnail(config.thumbnail_size, config.thumbnail_size)
        .to_rgb8();
    let total = u64::from(img.width()) * u64::from(img.height());

    Ok(
        dominant_colors(&img, config.color_tolerance, config.max_colors_per_image)
            .into_iter()
            .map(|(rgb, count)| {
                let named = nearest_name(rgb);
                ColorInfo {
                    name: named.name.to_string(),
                    hex: to_hex(rgb),
                    rgb,
                    count: Some(count),
                    percentage: Some(round2(count as f64 / total as f64 * 100.0)),
                    source: Some(source.to_string()),
                }
            })
            .collect(),
    )
}

/// Extracts [`ColorCollection`]s.
pub struct ColorExtractor {
    http: HttpClient,
    config: Arc<ExtractorConfig>,
}

impl ColorExtractor {
    pub fn new(http: HttpClient, config: Arc<ExtractorConfig>) -> Self {
        Self { http, config }
    }

    pub async fn extract(
        &self,
        sources: &StyleSources,
        computed: &ComputedStyles,
        images: &[String],
        progress: &Option<ProgressSender>,
    ) -> ColorCollection {
        emit(progress, ProgressStage::ExtractingColors, json!({}));

        emit(progress, ProgressStage::ExtractingColorsCss, json!({}));
        let from_css = css_colors(sources, computed);
        emit(
            progress,
            ProgressStage::ColorsExtractedCss,
            json!({ "count": from_css.len() }),
        );

        let from_images = self.image_colors(images, progress).await;

        emit(
            progress,
            ProgressStage::ColorsExtracted,
            json!({ "css": from_css.len(), "images": from_images.len() }),
        );
        ColorCollection {
            from_css,
            from_images,
        }
    }

    /// Sample the first few non-`data:` images. Per-image failures are
    /// logged and skipped.
    async fn image_colors(
        &self,
        images: &[String],
        progress: &Option<ProgressSender>,
    ) -> Vec<ColorInfo> {
        let urls: Vec<String> = images
            .iter()
            .filter(|u| !u.starts_with("data:"))
            .take(self.config.max_sampled_images)
            .cloned()
            .collect();
        emit(
            progress,
            ProgressStage::ExtractingColorsImages,
            json!({ "images": urls.len() }),
        );

        let mut colors = Vec::new();
        for (url, result) in self
            .http
            .get_many(&urls, self.config.fetch_concurrency, self.config.resource_timeout)
            .await
        {
            let bytes = match result {
                Ok(resp) => resp.body,
                Err(e) => {
                    let err = ExtractError::PartialResource {
                        url,
                        reason: format!("{e:#}"),
                    };
                    warn!("{err}");
                    continue;
                }
            };

            let config = Arc::clone(&self.config);
            let source = url.clone();
            let sampled =
                tokio::task::spawn_blocking(move || sample_image(&bytes, &source, &config)).await;
            match sampled {
                Ok(Ok(found)) => colors.extend(found),
                Ok(Err(e)) => debug!("could not decode {url}: {e}"),
                Err(e) => warn!("color sampling task for {url} failed: {e}"),
            }
        }

        colors.sort_by(|a, b| {
            b.percentage
                .partial_cmp(&a.percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut unique: OrderedSet<ColorInfo, String> = OrderedSet::new(|c: &ColorInfo| c.hex.clone());
        unique.extend(colors);
        let from_images = unique.into_vec();

        emit(
            progress,
            ProgressStage::ColorsExtractedImages,
            json!({ "count": from_images.len() }),
        );
        from_images
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stylesheets::Stylesheet;
    use image::Rgb;

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("#FFF"), Some([255, 255, 255]));
        assert_eq!(parse_color("#4682b4"), Some([70, 130, 180]));
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some([1, 2, 3]));
        assert_eq!(parse_color("rgba(10,20,30,0.5)"), Some([10, 20, 30]));
        assert_eq!(parse_color("rgb(10 20 30 / 40%)"), Some([10, 20, 30]));
        assert_eq!(parse_color("rgba(0, 0, 0, 0)"), None);
        assert_eq!(parse_color("rgb(300, 0, 0)"), None);
    }

    #[test]
    fn test_only_color_and_background_declarations() {
        let css = "/* color: #123456 */ a { color: #FF0000; border: 1px solid #00ff00; }\
                   @media (min-width: 10px) { .x { background: url(a.png) #00f; } }";
        assert_eq!(css_color_literals(css), vec!["#FF0000", "#00f"]);
    }

    #[test]
    fn test_css_colors_tally_merge_and_sort() {
        let sources = StyleSources {
            inline: vec!["a{color:#f00} b{color:#f00} c{background-color:#fff}".to_string()],
            external: vec![Stylesheet {
                url: "https://example.com/site.css".to_string(),
                text: "d{color:#FF0000} e{color:rgba(0,0,0,0)}".to_string(),
            }],
        };
        let computed = ComputedStyles {
            colors: vec![("rgb(255, 255, 255)".to_string(), 5)],
            fonts: vec![],
        };

        let colors = css_colors(&sources, &computed);
        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0].hex, "#ffffff");
        assert_eq!(colors[0].name, "white");
        assert_eq!(colors[0].count, Some(6));
        assert_eq!(colors[1].hex, "#ff0000");
        assert_eq!(colors[1].count, Some(3));
        assert!(colors.iter().all(|c| c.percentage.is_none()));
    }

    #[test]
    fn test_dominant_colors_clusters_similar_shades() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([200, 30, 30]));
        for x in 0..3 {
            for y in 0..10 {
                img.put_pixel(x, y, Rgb([30, 30, 200]));
            }
        }
        // A near-identical red shade joins the red cluster.
        img.put_pixel(9, 9, Rgb([201, 31, 30]));

        let colors = dominant_colors(&img, 12.0, 5);
        assert_eq!(colors, vec![([200, 30, 30], 70), ([30, 30, 200], 30)]);
    }

    #[test]
    fn test_dominant_colors_extremes() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        for x in 0..5 {
            img.put_pixel(x, 0, Rgb([0, 128, 0]));
        }
        // 95% white dominates, so it is kept.
        let colors = dominant_colors(&img, 12.0, 5);
        assert_eq!(colors[0].0, [255, 255, 255]);

        let mut img = RgbImage::from_pixel(10, 10, Rgb([0, 128, 0]));
        for x in 0..10 {
            img.put_pixel(x, 0, Rgb([0, 0, 0]));
        }
        // 10% black is noise.
        let colors = dominant_colors(&img, 12.0, 5);
        assert_eq!(colors, vec![([0, 128, 0], 90)]);
    }
}
