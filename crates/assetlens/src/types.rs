//! Core data types for extraction results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single named color found in CSS or sampled from an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorInfo {
    /// Nearest CSS named color.
    pub name: String,
    /// Lowercase `#rrggbb`.
    pub hex: String,
    pub rgb: [u8; 3],
    /// Occurrence count (CSS) or pixel count (images).
    #[serde(default)]
    pub count: Option<u64>,
    /// Image coverage in percent. Always `None` for CSS colors.
    #[serde(default)]
    pub percentage: Option<f64>,
    /// Image URL the color was sampled from.
    #[serde(default)]
    pub source: Option<String>,
}

/// Colors grouped by where they were found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorCollection {
    /// Sorted by `count`, descending.
    pub from_css: Vec<ColorInfo>,
    /// Sorted by `percentage`, descending.
    pub from_images: Vec<ColorInfo>,
}

/// Where a font reference was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FontKind {
    #[serde(rename = "Google Font")]
    GoogleFont,
    #[serde(rename = "Typekit/Adobe")]
    Typekit,
    #[serde(rename = "@font-face")]
    FontFace,
    #[serde(rename = "@font-face (external)")]
    FontFaceExternal,
    #[serde(rename = "inline")]
    Inline,
    #[serde(rename = "CSS")]
    Css,
    #[serde(rename = "computed")]
    Computed,
}

impl std::fmt::Display for FontKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GoogleFont => write!(f, "Google Font"),
            Self::Typekit => write!(f, "Typekit/Adobe"),
            Self::FontFace => write!(f, "@font-face"),
            Self::FontFaceExternal => write!(f, "@font-face (external)"),
            Self::Inline => write!(f, "inline"),
            Self::Css => write!(f, "CSS"),
            Self::Computed => write!(f, "computed"),
        }
    }
}

/// A font family referenced by the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FontKind,
    /// Stylesheet or font file the family came from, when known.
    #[serde(default)]
    pub url: Option<String>,
}

/// Deduplicated asset references found on the page.
///
/// Entries are normalized URLs, except `icons` and `svgs`, which may also
/// hold normalized inline SVG markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCollection {
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub scripts: Vec<String>,
    pub stylesheets: Vec<String>,
    pub icons: Vec<String>,
    pub svgs: Vec<String>,
}

/// The complete design summary of one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// The URL that was requested.
    pub url: String,
    pub colors: ColorCollection,
    pub fonts: Vec<FontInfo>,
    pub assets: AssetCollection,
    /// Assigned when the result is stored in the cache.
    #[serde(default)]
    pub result_id: Option<String>,
    /// When extraction finished.
    pub timestamp: DateTime<Utc>,
    /// True only when served from the cache.
    #[serde(default)]
    pub cached: bool,
    /// Wall-clock pipeline duration.
    #[serde(default)]
    pub extraction_time_ms: u64,
}

/// Summary row for cache listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResultInfo {
    pub id: String,
    pub url: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A page of cached results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResultsList {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub results: Vec<CachedResultInfo>,
}

/// Errors that can occur while extracting or serving results.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("Failed to fetch the webpage: {0}")]
    FetchFailure(String),

    /// A single image, stylesheet or SVG could not be fetched. Always
    /// absorbed by the caller.
    #[error("Resource {url} failed: {reason}")]
    PartialResource { url: String, reason: String },

    #[error("Result not found: {0}")]
    NotFound(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ExtractError {
    fn from(e: serde_json::Error) -> Self {
        ExtractError::Internal(format!("serialization failed: {e}"))
    }
}

/// Convenience result type.
pub type ExtractResult<T> = Result<T, ExtractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_kind_wire_names() {
        let font = FontInfo {
            name: "Inter".to_string(),
            kind: FontKind::FontFaceExternal,
            url: None,
        };
        let json = serde_json::to_value(&font).unwrap();
        assert_eq!(json["type"], "@font-face (external)");
        assert_eq!(FontKind::GoogleFont.to_string(), "Google Font");
    }

    #[test]
    fn test_result_defaults_on_deserialize() {
        let json = serde_json::json!({
            "url": "https://example.com",
            "colors": { "from_css": [], "from_images": [] },
            "fonts": [],
            "assets": {
                "images": [], "videos": [], "scripts": [],
                "stylesheets": [], "icons": [], "svgs": []
            },
            "timestamp": "2026-01-01T00:00:00Z"
        });
        let result: ExtractionResult = serde_json::from_value(json).unwrap();
        assert!(!result.cached);
        assert!(result.result_id.is_none());
    }
}
