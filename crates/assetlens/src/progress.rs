//! Progress event types and the channel that carries them.
//!
//! The pipeline emits `ProgressEvent`s as it completes sub-steps. They flow
//! through a bounded `tokio::sync::mpsc` channel to a single consumer (the
//! stream loop). When no consumer exists the sender is `None` and emission
//! is free.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named checkpoints of one extraction. Wire names are snake_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    FetchingPage,
    LoadingPage,
    PageLoaded,
    ParsingContent,
    ExtractingJsResources,
    ResourceLoaded,
    PageFetchComplete,
    PageFetchError,
    FallbackRequest,
    FallbackComplete,
    FallbackFailed,
    ExtractingColorsCss,
    ExtractingColorsImages,
    ColorsExtractedCss,
    ColorsExtractedImages,
    ExtractingFonts,
    FontsExtracted,
    ExtractingAssets,
    ProcessingResources,
    AssetsExtracted,
    ExtractionComplete,
    ExtractionFailed,
    ExtractingColors,
    ColorsExtracted,
}

impl ProgressStage {
    /// Every stage, in vocabulary order.
    pub const ALL: [ProgressStage; 24] = [
        Self::FetchingPage,
        Self::LoadingPage,
        Self::PageLoaded,
        Self::ParsingContent,
        Self::ExtractingJsResources,
        Self::ResourceLoaded,
        Self::PageFetchComplete,
        Self::PageFetchError,
        Self::FallbackRequest,
        Self::FallbackComplete,
        Self::FallbackFailed,
        Self::ExtractingColorsCss,
        Self::ExtractingColorsImages,
        Self::ColorsExtractedCss,
        Self::ColorsExtractedImages,
        Self::ExtractingFonts,
        Self::FontsExtracted,
        Self::ExtractingAssets,
        Self::ProcessingResources,
        Self::AssetsExtracted,
        Self::ExtractionComplete,
        Self::ExtractionFailed,
        Self::ExtractingColors,
        Self::ColorsExtracted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchingPage => "fetching_page",
            Self::LoadingPage => "loading_page",
            Self::PageLoaded => "page_loaded",
            Self::ParsingContent => "parsing_content",
            Self::ExtractingJsResources => "extracting_js_resources",
            Self::ResourceLoaded => "resource_loaded",
            Self::PageFetchComplete => "page_fetch_complete",
            Self::PageFetchError => "page_fetch_error",
            Self::FallbackRequest => "fallback_request",
            Self::FallbackComplete => "fallback_complete",
            Self::FallbackFailed => "fallback_failed",
            Self::ExtractingColorsCss => "extracting_colors_css",
            Self::ExtractingColorsImages => "extracting_colors_images",
            Self::ColorsExtractedCss => "colors_extracted_css",
            Self::ColorsExtractedImages => "colors_extracted_images",
            Self::ExtractingFonts => "extracting_fonts",
            Self::FontsExtracted => "fonts_extracted",
            Self::ExtractingAssets => "extracting_assets",
            Self::ProcessingResources => "processing_resources",
            Self::AssetsExtracted => "assets_extracted",
            Self::ExtractionComplete => "extraction_complete",
            Self::ExtractionFailed => "extraction_failed",
            Self::ExtractingColors => "extracting_colors",
            Self::ColorsExtracted => "colors_extracted",
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A progress event: stage name plus stage-specific context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    /// Always a JSON object; empty when the stage carries no context.
    pub data: Value,
}

/// Sender handle for emitting progress events.
pub type ProgressSender = tokio::sync::mpsc::Sender<ProgressEvent>;

/// Receiver handle for consuming progress events.
pub type ProgressReceiver = tokio::sync::mpsc::Receiver<ProgressEvent>;

/// Create a progress channel with a bounded buffer.
///
/// One extraction emits a few dozen events, far below the bound.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::mpsc::channel(256)
}

/// Emit a progress event, silently dropping it when nobody is listening or
/// the buffer is full.
pub fn emit(tx: &Option<ProgressSender>, stage: ProgressStage, data: Value) {
    if let Some(ref sender) = tx {
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };
        let _ = sender.try_send(ProgressEvent { stage, data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names_match_display() {
        for stage in ProgressStage::ALL {
            let wire = serde_json::to_value(stage).unwrap();
            assert_eq!(wire, json!(stage.as_str()));
        }
    }

    #[test]
    fn test_progress_event_serialization() {
        let event = ProgressEvent {
            stage: ProgressStage::LoadingPage,
            data: json!({ "strategy": "domcontentloaded", "timeout_ms": 30000 }),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"stage\":\"loading_page\""));
        assert!(json.contains("domcontentloaded"));

        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_emit_delivers_and_normalizes_null() {
        let (tx, mut rx) = channel();
        let tx = Some(tx);
        emit(&tx, ProgressStage::FetchingPage, Value::Null);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.stage, ProgressStage::FetchingPage);
        assert_eq!(ev.data, json!({}));
    }

    #[test]
    fn test_emit_closed_or_none() {
        let (tx, rx) = channel();
        drop(rx);
        // Should not panic
        emit(&Some(tx), ProgressStage::PageLoaded, json!({}));
        emit(&None, ProgressStage::PageLoaded, json!({}));
    }
}
