//! Network surfaces for assetlens over a shared [`assetlens::AssetExtractor`]:
//! JSON extraction, SSE progress streams and cache browsing over HTTP, plus
//! an MCP tool over stdio.

pub mod error;
pub mod mcp;
pub mod rest;

pub use error::ApiError;
pub use rest::{router, serve};
