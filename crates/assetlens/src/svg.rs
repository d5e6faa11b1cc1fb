//! SVG repair, canonicalization and icon/illustration classification.
//!
//! Works on markup text rather than a parsed tree: inline SVG lifted out of
//! arbitrary pages is frequently not well-formed XML, and the repairs here
//! only ever touch the root `<svg>` tag, nested `viewBox` attributes and
//! shape elements.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

/// Fallback dimension used when nothing in the markup says otherwise.
const DEFAULT_EXTENT: f64 = 24.0;

/// Icons have both extents at or below this size.
const ICON_MAX_EXTENT: f64 = 100.0;

const ICON_KEYWORDS: &[&str] = &["icon", "logo", "glyph", "symbol", "button", "arrow", "menu"];

/// Visual role of an SVG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvgKind {
    Icon,
    Illustration,
}

fn regex(pattern: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r"\s+", &RE)
}

fn between_tags_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r">\s+<", &RE)
}

fn viewbox_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r"(?i)\bviewbox(\s*=)", &RE)
}

fn root_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r"(?is)<svg\b([^>]*?)(/?)>", &RE)
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        r#"([^\s=/>"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+)))?"#,
        &RE,
    )
}

fn nested_view_box_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r#"\s+viewBox\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#, &RE)
}

fn shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r"(?i)<(path|rect|circle|ellipse|polygon|polyline)\b([^>]*)>", &RE)
}

fn paint_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r#"(?i)(?:^|[\s;"'])(?:fill|stroke)\s*[=:]"#, &RE)
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r"<[a-zA-Z][^>]*>", &RE)
}

fn path_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(r"(?i)<path\b", &RE)
}

/// Attributes of the root `<svg>` tag, in source order.
struct RootTag {
    attrs: Vec<(String, Option<String>)>,
    self_closing: bool,
}

impl RootTag {
    fn parse(attr_text: &str, self_closing: bool) -> Self {
        let attrs = attr_re()
            .captures_iter(attr_text)
            .map(|c| {
                let name = c[1].to_string();
                let value = c
                    .get(2)
                    .or_else(|| c.get(3))
                    .or_else(|| c.get(4))
                    .map(|m| m.as_str().to_string());
                (name, value)
            })
            .collect();
        Self {
            attrs,
            self_closing,
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    fn has(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    fn view_boxes(&self) -> impl Iterator<Item = &str> {
        self.attrs
            .iter()
            .filter(|(n, _)| n == "viewBox")
            .filter_map(|(_, v)| v.as_deref())
    }

    fn render(&self) -> String {
        let mut out = String::from("<svg");
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            if let Some(v) = value {
                out.push_str("=\"");
                out.push_str(&v.replace('"', "&quot;"));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str("/>");
        } else {
            out.push('>');
        }
        out
    }
}

/// Parse a `viewBox` value into `(min_x, min_y, width, height)`.
fn parse_view_box(value: &str) -> Option<[f64; 4]> {
    let nums: Vec<f64> = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match nums.as_slice() {
        [x, y, w, h] => Some([*x, *y, *w, *h]),
        _ => None,
    }
}

/// Parse a length attribute such as `24`, `24px` or `1.5e1`. Percentages
/// and other relative units are rejected.
fn parse_length(value: &str) -> Option<f64> {
    let v = value.trim();
    let v = v.strip_suffix("px").unwrap_or(v).trim();
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Decode the handful of entities that show up when SVG markup has been
/// HTML-escaped (e.g. pulled out of JSON or a `data-*` attribute).
fn unescape_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Canonicalize raw SVG markup.
///
/// The output always has exactly one positive-extent `viewBox`, on the root
/// element, plus an `xmlns` and explicit `width`/`height`.
pub fn normalize(raw: &str) -> String {
    let text = if raw.contains("&lt;") || raw.contains("&gt;") || raw.contains("&quot;") {
        unescape_entities(raw)
    } else {
        raw.to_string()
    };

    let text = whitespace_re().replace_all(text.trim(), " ");
    let text = between_tags_re().replace_all(&text, "><");
    let text = viewbox_name_re().replace_all(&text, "viewBox$1");

    let Some(caps) = root_tag_re().captures(&text) else {
        // Not an SVG at all; wrap so the output contract still holds.
        return normalize(&format!("<svg>{text}</svg>"));
    };

    let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
    let mut root = RootTag::parse(&caps[1], !caps[2].is_empty());
    let inherits_paint = paint_attr_re().is_match(&caps[1]);

    // Sprites and nested <svg>/<symbol> elements carry their own boxes; the
    // root keeps the first usable one and the rest are dropped.
    let (head, tail) = text.split_at(whole.end);
    let head = &head[..whole.start];
    let nested: Vec<String> = nested_view_box_re()
        .captures_iter(tail)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str().to_string())
        .collect();
    let tail = nested_view_box_re().replace_all(tail, "");

    let view_box = root
        .view_boxes()
        .chain(nested.iter().map(String::as_str))
        .filter_map(parse_view_box)
        .find(|[_, _, w, h]| *w > 0.0 && *h > 0.0);

    let width = root.get("width").and_then(parse_length).filter(|w| *w > 0.0);
    let height = root.get("height").and_then(parse_length).filter(|h| *h > 0.0);

    let [vx, vy, vw, vh] = match (view_box, width, height) {
        (Some(vb), _, _) => vb,
        (None, Some(w), Some(h)) => [0.0, 0.0, w, h],
        _ => [0.0, 0.0, DEFAULT_EXTENT, DEFAULT_EXTENT],
    };

    root.attrs.retain(|(n, _)| n != "viewBox");
    root.attrs.push((
        "viewBox".to_string(),
        Some(format!(
            "{} {} {} {}",
            format_number(vx),
            format_number(vy),
            format_number(vw),
            format_number(vh)
        )),
    ));

    if !root.has("xmlns") {
        root.attrs
            .insert(0, ("xmlns".to_string(), Some(SVG_NAMESPACE.to_string())));
    }
    if !root.has("width") {
        root.attrs
            .push(("width".to_string(), Some(format_number(vw))));
    }
    if !root.has("height") {
        root.attrs
            .push(("height".to_string(), Some(format_number(vh))));
    }

    let rebuilt_root = root.render();

    let tail = if inherits_paint {
        tail.into_owned()
    } else {
        fill_bare_shapes(&tail)
    };

    format!("{head}{rebuilt_root}{tail}")
}

/// Give shapes with neither `fill` nor `stroke` an explicit
/// `fill="currentColor"` so they stay visible outside their original page.
fn fill_bare_shapes(markup: &str) -> String {
    shape_re()
        .replace_all(markup, |c: &Captures| {
            let attrs = &c[2];
            if paint_attr_re().is_match(attrs) {
                c[0].to_string()
            } else {
                format!("<{} fill=\"currentColor\"{}>", &c[1], attrs)
            }
        })
        .into_owned()
}

/// Root extents from `viewBox`, falling back to `width`/`height`.
fn root_extents(markup: &str) -> Option<(f64, f64)> {
    let caps = root_tag_re().captures(markup)?;
    let root = RootTag::parse(&caps[1], false);

    let from_view_box = root
        .attrs
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("viewBox"))
        .filter_map(|(_, v)| v.as_deref().and_then(parse_view_box))
        .find(|[_, _, w, h]| *w > 0.0 && *h > 0.0)
        .map(|[_, _, w, h]| (w, h));

    from_view_box.or_else(|| {
        let w = root.get("width").and_then(parse_length)?;
        let h = root.get("height").and_then(parse_length)?;
        Some((w, h))
    })
}

/// Decide whether markup is an icon or an illustration.
pub fn classify(markup: &str) -> SvgKind {
    let lower = markup.to_ascii_lowercase();

    if ICON_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return SvgKind::Icon;
    }

    if let Some((w, h)) = root_extents(markup) {
        if w <= ICON_MAX_EXTENT && h <= ICON_MAX_EXTENT {
            return SvgKind::Icon;
        }
    }

    let paths = path_tag_re().find_iter(markup).count();
    let tags = tag_re().find_iter(markup).count();
    if paths < 10 && tags < 30 {
        return SvgKind::Icon;
    }

    if lower.contains("stroke-width") && lower.contains("fill=\"none\"") {
        return SvgKind::Icon;
    }

    SvgKind::Illustration
}
