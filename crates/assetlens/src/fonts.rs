//! Font family discovery with provenance.

use crate::acquire::PageSnapshot;
use crate::dedup::OrderedSet;
use crate::progress::{emit, ProgressSender, ProgressStage};
use crate::stylesheets::StyleSources;
use crate::types::{FontInfo, FontKind};
use crate::url_norm;
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::OnceLock;

/// Generic families and CSS-wide keywords; never font names.
const NOT_A_FAMILY: &[&str] = &[
    "serif",
    "sans-serif",
    "monospace",
    "cursive",
    "fantasy",
    "inherit",
    "initial",
    "unset",
    "revert",
];

const ADOBE_FONTS: &str = "Adobe Fonts (Typekit)";

fn google_family_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"family=([^&]+)").expect("valid regex"))
}

fn font_face_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)@font-face\s*\{([^}]*)\}").expect("valid regex"))
}

fn face_family_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)font-family\s*:\s*['"]?([^'";}]+)['"]?"#).expect("valid regex")
    })
}

fn face_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bsrc\s*:[^;]*?url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("valid regex")
    })
}

fn family_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)font-family\s*:\s*([^;{}]+)").expect("valid regex"))
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)"#).expect("valid regex")
    })
}

/// Split a `font-family` value into concrete family names.
pub fn split_families(value: &str) -> Vec<String> {
    let value = value.replace("!important", "");
    value
        .split(',')
        .map(|f| f.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|f| !f.is_empty())
        .filter(|f| !f.to_ascii_lowercase().starts_with("var("))
        .filter(|f| !NOT_A_FAMILY.contains(&f.to_ascii_lowercase().as_str()))
        .map(str::to_string)
        .collect()
}

/// Family names requested by a Google Fonts stylesheet URL.
pub fn google_families(href: &str) -> Vec<String> {
    google_family_re()
        .captures_iter(href)
        .flat_map(|c| {
            let raw = c[1].replace('+', " ");
            let decoded = percent_decode_str(&raw).decode_utf8_lossy().into_owned();
            decoded
                .split('|')
                .map(|f| f.split(':').next().unwrap_or_default().trim().to_string())
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn is_google_fonts(url: &str) -> bool {
    url.contains("fonts.googleapis.com")
}

fn is_adobe_fonts(url: &str) -> bool {
    url.contains("use.typekit.net") || url.contains("use.edgefonts.net")
}

/// Accumulates fonts unique by `(name, kind)`.
struct FontList {
    fonts: OrderedSet<FontInfo, (String, FontKind)>,
}

impl FontList {
    fn new() -> Self {
        Self {
            fonts: OrderedSet::new(|f: &FontInfo| (f.name.clone(), f.kind)),
        }
    }

    fn add(&mut self, name: &str, kind: FontKind, url: Option<String>) {
        let lower = name.to_ascii_lowercase();
        if name.is_empty() || NOT_A_FAMILY.contains(&lower.as_str()) {
            return;
        }
        self.fonts.insert(FontInfo {
            name: name.to_string(),
            kind,
            url,
        });
    }

    /// `@font-face` rules in `css`, with `src` resolved against `base`.
    fn add_font_faces(&mut self, css: &str, base: &str, kind: FontKind) {
        for block in font_face_re().captures_iter(css) {
            let body = &block[1];
            let Some(family) = face_family_re().captures(body) else {
                continue;
            };
            let src = face_src_re()
                .captures(body)
                .and_then(|c| url_norm::normalize(&c[1], base));
            self.add(family[1].trim(), kind, src);
        }
    }

    fn into_vec(self) -> Vec<FontInfo> {
        self.fonts.into_vec()
    }
}

fn scan_markup(html: &str, base: &str, list: &mut FontList) {
    let doc = Html::parse_document(html);

    if let Ok(sel) = Selector::parse("link[href]") {
        for link in doc.select(&sel) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let url = url_norm::normalize(href, base);
            if is_google_fonts(href) {
                for family in google_families(href) {
                    list.add(&family, FontKind::GoogleFont, url.clone());
                }
            } else if is_adobe_fonts(href) {
                list.add(ADOBE_FONTS, FontKind::Typekit, url);
            }
        }
    }

    if let Ok(sel) = Selector::parse("script[src]") {
        for script in doc.select(&sel) {
            if let Some(src) = script.value().attr("src") {
                if is_adobe_fonts(src) {
                    list.add(ADOBE_FONTS, FontKind::Typekit, url_norm::normalize(src, base));
                }
            }
        }
    }

    if let Ok(sel) = Selector::parse("[style]") {
        for el in doc.select(&sel) {
            let Some(style) = el.value().attr("style") else {
                continue;
            };
            for decl in family_decl_re().captures_iter(style) {
                for family in split_families(&decl[1]) {
                    list.add(&family, FontKind::Inline, None);
                }
            }
        }
    }
}

/// Collect fonts from markup, style sources and computed styles.
pub fn collect_fonts(page: &PageSnapshot, sources: &StyleSources) -> Vec<FontInfo> {
    let base = page.final_url.as_str();
    let mut list = FontList::new();

    scan_markup(&page.html, base, &mut list);

    for css in &sources.inline {
        for import in import_re().captures_iter(css) {
            let href = &import[1];
            if is_google_fonts(href) {
                let url = url_norm::normalize(href, base);
                for family in google_families(href) {
                    list.add(&family, FontKind::GoogleFont, url.clone());
                }
            }
        }
        list.add_font_faces(css, base, FontKind::FontFace);
    }

    for sheet in &sources.external {
        list.add_font_faces(&sheet.text, &sheet.url, FontKind::FontFaceExternal);
        let without_faces = font_face_re().replace_all(&sheet.text, "");
        for decl in family_decl_re().captures_iter(&without_faces) {
            for family in split_families(&decl[1]) {
                list.add(&family, FontKind::Css, Some(sheet.url.clone()));
            }
        }
    }

    for stack in &page.computed.fonts {
        for family in split_families(stack) {
            list.add(&family, FontKind::Computed, None);
        }
    }

    list.into_vec()
}

/// [`collect_fonts`] wrapped in progress events.
pub fn extract(
    page: &PageSnapshot,
    sources: &StyleSources,
    progress: &Option<ProgressSender>,
) -> Vec<FontInfo> {
    emit(progress, ProgressStage::ExtractingFonts, json!({}));
    let fonts = collect_fonts(page, sources);
    emit(
        progress,
        ProgressStage::FontsExtracted,
        json!({ "count": fonts.len() }),
    );
    fonts
}
