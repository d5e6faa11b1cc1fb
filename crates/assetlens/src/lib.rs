//! Assetlens: design asset extraction for arbitrary web pages.
//!
//! Renders a page (or fetches it plainly when no browser is around) and
//! reports its colors, fonts, media and SVG icons, either as one result or
//! as a stream of progress events. Results are cached by URL and by ID.

pub mod acquire;
pub mod cache;
pub mod collect;
pub mod color_names;
pub mod colors;
pub mod config;
pub mod dedup;
pub mod fonts;
pub mod http_client;
pub mod pipeline;
pub mod progress;
pub mod renderer;
pub mod service;
pub mod stream;
pub mod stylesheets;
pub mod svg;
pub mod types;
pub mod url_norm;

pub use cache::{CacheStore, MemoryCacheStore, ResultCache};
pub use config::ExtractorConfig;
pub use pipeline::ExtractionPipeline;
pub use progress::{ProgressEvent, ProgressStage};
pub use renderer::chromium::{find_chromium, ChromiumRenderer};
pub use renderer::{NoopRenderer, Renderer, WaitStrategy};
pub use service::AssetExtractor;
pub use stream::{CancelHandle, FrameStream, StreamEvent, StreamFrame};
pub use svg::SvgKind;
pub use types::*;
