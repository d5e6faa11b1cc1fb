//! URL resolution and cache-friendly canonicalization.

use percent_encoding::percent_decode_str;
use url::Url;

/// Extensions whose query strings carry no addressing information.
const STATIC_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];

/// Resolve `raw` against `base_url` and canonicalize it.
///
/// Returns `None` for empty input or anything that cannot be resolved.
/// `data:` URIs are returned untouched. The query string is dropped when
/// the path ends in a static image extension and kept otherwise.
pub fn normalize(raw: &str, base_url: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("data:") {
        return Some(raw.to_string());
    }

    let base = Url::parse(base_url).ok()?;

    let absolute = if let Some(rest) = raw.strip_prefix("//") {
        format!("{}://{}", base.scheme(), rest)
    } else {
        raw.to_string()
    };

    let decoded = percent_decode_str(&absolute).decode_utf8_lossy();
    let mut resolved = base.join(&decoded).ok()?;

    if has_static_image_extension(&resolved) {
        resolved.set_query(None);
    }

    Some(resolved.to_string())
}

fn has_static_image_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    STATIC_IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Whether the URL's path points at an SVG file.
pub fn is_svg_url(url: &str) -> bool {
    if url.starts_with("data:") {
        return false;
    }
    match Url::parse(url) {
        Ok(u) => u.path().to_ascii_lowercase().ends_with(".svg"),
        Err(_) => url.to_ascii_lowercase().ends_with(".svg"),
    }
}

/// Path extension of a URL, lowercased, without the dot.
pub fn extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?.to_string();
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Check that `input` looks like an absolute http(s) URL with a host.
pub fn is_valid_http_url(input: &str) -> bool {
    match Url::parse(input.trim()) {
        Ok(u) => {
            matches!(u.scheme(), "http" | "https")
                && u.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}
