//! The `extract_assets` tool.

use assetlens::AssetExtractor;
use serde::Deserialize;
use serde_json::{json, Value};

use super::message::{McpError, McpResult, ToolCallResult, ToolDefinition};

pub const EXTRACT_ASSETS: &str = "extract_assets";

#[derive(Debug, Deserialize)]
struct ExtractArgs {
    url: String,
    #[serde(default)]
    force_refresh: bool,
}

pub fn list_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: EXTRACT_ASSETS.to_string(),
        description: "Extracts web assets like colors, fonts, images, etc., from a given URL."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Page to extract from" },
                "force_refresh": {
                    "type": "boolean",
                    "default": false,
                    "description": "Ignore any cached result"
                }
            },
            "required": ["url"]
        }),
    }]
}

/// Run a tool. Extraction failures become `isError` results; malformed
/// arguments and unknown tools are protocol errors.
pub async fn call(
    name: &str,
    arguments: Option<Value>,
    extractor: &AssetExtractor,
) -> McpResult<ToolCallResult> {
    if name != EXTRACT_ASSETS {
        return Err(McpError::ToolNotFound(name.to_string()));
    }

    let args: ExtractArgs = serde_json::from_value(arguments.unwrap_or_else(|| json!({})))
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    tracing::info!("extract_assets {}", args.url);
    match extractor.extract(&args.url, args.force_refresh).await {
        Ok(result) => ToolCallResult::json(&result),
        Err(e) => Ok(ToolCallResult::error(e.to_string())),
    }
}
