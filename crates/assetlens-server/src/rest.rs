//! REST and SSE endpoints.
//!
//! Every handler shares one [`AssetExtractor`]; it is cheap to clone and
//! its clones share the pipeline and the result cache.

use crate::error::ApiError;
use assetlens::{AssetExtractor, CachedResultsList, ExtractionResult, StreamFrame};
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};

const DEFAULT_PAGE_SIZE: usize = 20;

/// Build the router with every endpoint and permissive CORS.
pub fn router(extractor: AssetExtractor) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/api", get(index))
        .route("/health", get(health))
        .route("/api/extract", post(extract))
        .route("/api/extract/sse", get(extract_sse))
        .route("/api/extract-sse", get(extract_sse))
        .route("/api/cache", get(list_cache))
        .route("/api/cache/:id", get(cached_result))
        .layer(cors)
        .with_state(extractor)
}

/// Listen on `addr` until the process exits.
pub async fn serve(addr: SocketAddr, extractor: AssetExtractor) -> anyhow::Result<()> {
    let app = router(extractor);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("assetlens listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Request shapes ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    #[serde(default)]
    url: String,
    #[serde(default, alias = "forceRefresh")]
    force_refresh: bool,
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    url: Option<String>,
    #[serde(default)]
    force_refresh: bool,
}

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default = "default_page_size")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

// ── Handlers ────────────────────────────────────────────────────

async fn index(State(extractor): State<AssetExtractor>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache_available": extractor.cache_available().await,
        "endpoints": {
            "extract": "/api/extract",
            "stream": "/api/extract/sse",
            "cache": "/api/cache",
            "cache_by_id": "/api/cache/{result_id}",
        },
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn extract(
    State(extractor): State<AssetExtractor>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractionResult>, ApiError> {
    let result = extractor.extract(&req.url, req.force_refresh).await?;
    Ok(Json(result))
}

/// Streams extraction events. Each event is one `data:` frame holding a
/// JSON object; quiet periods produce `: keepalive` comments. Dropping the
/// connection drops the stream, which stops the extraction task.
async fn extract_sse(
    State(extractor): State<AssetExtractor>,
    Query(params): Query<StreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let url = params.url.unwrap_or_default();
    let (frames, _cancel) = extractor.stream(&url, params.force_refresh).await;
    Sse::new(frames.map(|frame| Ok(sse_event(frame))))
}

fn sse_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Keepalive => Event::default().comment("keepalive"),
        StreamFrame::Event(event) => match serde_json::to_string(&event) {
            Ok(data) => Event::default().data(data),
            Err(e) => {
                tracing::warn!("dropping unserializable stream event: {e}");
                Event::default().comment("unserializable event")
            }
        },
    }
}

async fn list_cache(
    State(extractor): State<AssetExtractor>,
    Query(page): Query<PageParams>,
) -> Result<Json<CachedResultsList>, ApiError> {
    Ok(Json(extractor.list_cached(page.limit, page.offset).await?))
}

async fn cached_result(
    State(extractor): State<AssetExtractor>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionResult>, ApiError> {
    Ok(Json(extractor.cached(&id).await?))
}
