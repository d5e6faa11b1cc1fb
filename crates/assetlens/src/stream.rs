//! Streamed extraction protocol.
//!
//! Every stream is `start` → `progress`* → one of `complete` / `error` /
//! `cancelled` → `end`, with keepalive frames while the producer is quiet.
//! The producer runs as its own task and reports through a bounded
//! channel; the consumer finishes only once that channel is closed (the
//! producer is done and every queued event has been forwarded).

use crate::progress::{self, ProgressEvent, ProgressReceiver, ProgressSender};
use crate::types::{ExtractResult, ExtractionResult};
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One protocol event. Serialized as a JSON object tagged by `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Start { url: String },
    Progress(ProgressEvent),
    CachedResult { result_id: Option<String> },
    Complete { result: Box<ExtractionResult> },
    Error { message: String },
    Cancelled,
    End,
}

impl StreamEvent {
    /// `complete`, `error` or `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. } | Self::Cancelled)
    }
}

/// What a stream yields: an event, or a keepalive while nothing happens.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(StreamEvent),
    Keepalive,
}

impl StreamFrame {
    pub fn event(&self) -> Option<&StreamEvent> {
        match self {
            Self::Event(e) => Some(e),
            Self::Keepalive => None,
        }
    }
}

/// A boxed stream of frames.
pub type FrameStream = BoxStream<'static, StreamFrame>;

/// Cancels a running stream's producer. Cloneable.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Aborts the producer if the stream is dropped before it finishes.
struct AbortOnDrop<T>(Option<JoinHandle<T>>);

impl<T> AbortOnDrop<T> {
    fn abort(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Resolves once cancellation is requested; never if the handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

enum Step {
    Cancel,
    Event(ProgressEvent),
    Drained,
    Idle,
}

/// `error` then `end`, with no `start`. Used for rejected input.
pub fn error_stream(message: String) -> FrameStream {
    futures::stream::iter([
        StreamFrame::Event(StreamEvent::Error { message }),
        StreamFrame::Event(StreamEvent::End),
    ])
    .boxed()
}

/// Replay a cached result: `start`, `cached_result`, a short pause,
/// `complete`, `end`.
pub fn cached_stream(result: ExtractionResult, delay: Duration) -> FrameStream {
    stream! {
        yield StreamFrame::Event(StreamEvent::Start { url: result.url.clone() });
        yield StreamFrame::Event(StreamEvent::CachedResult {
            result_id: result.result_id.clone(),
        });
        tokio::time::sleep(delay).await;
        yield StreamFrame::Event(StreamEvent::Complete { result: Box::new(result) });
        yield StreamFrame::Event(StreamEvent::End);
    }
    .boxed()
}

/// Run `producer` as a task and stream its progress.
///
/// `make_producer` receives the progress sender; the producer must drop it
/// when it finishes (moving it into the work does that). Waits on the
/// queue for at most `poll` before emitting a keepalive.
pub fn live_stream<F, Fut>(
    url: String,
    make_producer: F,
    poll: Duration,
    cancel: watch::Receiver<bool>,
) -> FrameStream
where
    F: FnOnce(ProgressSender) -> Fut + Send + 'static,
    Fut: Future<Output = ExtractResult<ExtractionResult>> + Send + 'static,
{
    stream! {
        yield StreamFrame::Event(StreamEvent::Start { url: url.clone() });

        let (tx, mut rx): (ProgressSender, ProgressReceiver) = progress::channel();
        let mut producer = AbortOnDrop(Some(tokio::spawn(make_producer(tx))));
        let mut cancel = cancel;

        let terminal = loop {
            let step = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => Step::Cancel,
                msg = tokio::time::timeout(poll, rx.recv()) => match msg {
                    Ok(Some(event)) => Step::Event(event),
                    Ok(None) => Step::Drained,
                    Err(_) => Step::Idle,
                },
            };

            match step {
                Step::Event(event) => {
                    yield StreamFrame::Event(StreamEvent::Progress(event));
                }
                Step::Idle => {
                    yield StreamFrame::Keepalive;
                }
                Step::Cancel => {
                    debug!("stream for {url} cancelled");
                    producer.abort();
                    break StreamEvent::Cancelled;
                }
                Step::Drained => {
                    let Some(handle) = producer.0.take() else {
                        break StreamEvent::Error { message: "producer missing".to_string() };
                    };
                    break match handle.await {
                        Ok(Ok(result)) => StreamEvent::Complete { result: Box::new(result) },
                        Ok(Err(e)) => StreamEvent::Error { message: e.to_string() },
                        Err(e) => {
                            warn!("extraction task for {url} did not finish: {e}");
                            StreamEvent::Error { message: format!("Extraction failed: {e}") }
                        }
                    };
                }
            }
        };

        yield StreamFrame::Event(terminal);
        yield StreamFrame::Event(StreamEvent::End);
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{emit, ProgressStage};
    use crate::types::{AssetCollection, ColorCollection, ExtractError};
    use chrono::Utc;
    use serde_json::json;

    fn result(url: &str) -> ExtractionResult {
        ExtractionResult {
            url: url.to_string(),
            colors: ColorCollection::default(),
            fonts: vec![],
            assets: AssetCollection::default(),
            result_id: Some("abc".to_string()),
            timestamp: Utc::now(),
            cached: false,
            extraction_time_ms: 1,
        }
    }

    fn events(frames: &[StreamFrame]) -> Vec<StreamEvent> {
        frames.iter().filter_map(|f| f.event().cloned()).collect()
    }

    #[test]
    fn test_wire_format() {
        let progress = StreamEvent::Progress(ProgressEvent {
            stage: ProgressStage::LoadingPage,
            data: json!({ "strategy": "load" }),
        });
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({ "event": "progress", "stage": "loading_page", "data": { "strategy": "load" } })
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::End).unwrap(),
            json!({ "event": "end" })
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::CachedResult { result_id: Some("x".into()) })
                .unwrap(),
            json!({ "event": "cached_result", "result_id": "x" })
        );
    }

    #[tokio::test]
    async fn test_progress_drains_before_complete() {
        let (_cancel, rx) = CancelHandle::new();
        let stream = live_stream(
            "https://example.com/".to_string(),
            |tx| async move {
                let tx = Some(tx);
                for _ in 0..50 {
                    emit(&tx, ProgressStage::ProcessingResources, json!({}));
                }
                Ok::<_, ExtractError>(result("https://example.com/"))
            },
            Duration::from_millis(500),
            rx,
        );
        let frames: Vec<_> = stream.collect().await;
        let evs = events(&frames);

        assert_eq!(evs.len(), 53);
        assert!(matches!(evs[0], StreamEvent::Start { .. }));
        assert!(evs[1..51]
            .iter()
            .all(|e| matches!(e, StreamEvent::Progress(_))));
        assert!(matches!(evs[51], StreamEvent::Complete { .. }));
        assert_eq!(evs[52], StreamEvent::End);
    }

    #[tokio::test]
    async fn test_error_is_terminal_then_end() {
        let (_cancel, rx) = CancelHandle::new();
        let stream = live_stream(
            "https://example.com/".to_string(),
            |_tx| async move { Err::<ExtractionResult, _>(ExtractError::FetchFailure("boom".to_string())) },
            Duration::from_millis(500),
            rx,
        );
        let evs = events(&stream.collect::<Vec<_>>().await);
        let n = evs.len();
        assert!(matches!(&evs[n - 2], StreamEvent::Error { message } if message.contains("boom")));
        assert_eq!(evs[n - 1], StreamEvent::End);
    }

    #[tokio::test]
    async fn test_keepalive_while_quiet() {
        let (_cancel, rx) = CancelHandle::new();
        let stream = live_stream(
            "https://example.com/".to_string(),
            |tx| async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                drop(tx);
                Ok::<_, ExtractError>(result("https://example.com/"))
            },
            Duration::from_millis(20),
            rx,
        );
        let frames: Vec<_> = stream.collect().await;
        assert!(frames.iter().any(|f| *f == StreamFrame::Keepalive));
        assert_eq!(frames.last(), Some(&StreamFrame::Event(StreamEvent::End)));
    }

    #[tokio::test]
    async fn test_cancel_stops_producer() {
        let (cancel, rx) = CancelHandle::new();
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let mut stream = live_stream(
            "https://example.com/".to_string(),
            move |tx| async move {
                let tx = Some(tx);
                emit(&tx, ProgressStage::FetchingPage, json!({}));
                tokio::time::sleep(Duration::from_secs(30)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, ExtractError>(result("https://example.com/"))
            },
            Duration::from_millis(50),
            rx,
        );

        let mut seen = Vec::new();
        while let Some(frame) = stream.next().await {
            if let StreamFrame::Event(StreamEvent::Progress(_)) = &frame {
                cancel.cancel();
            }
            seen.push(frame);
        }

        let evs = events(&seen);
        let n = evs.len();
        assert_eq!(evs[n - 2], StreamEvent::Cancelled);
        assert_eq!(evs[n - 1], StreamEvent::End);
        assert!(!evs[..n - 2]
            .iter()
            .any(|e| e.is_terminal()));
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cached_stream_sequence() {
        let evs = events(
            &cached_stream(result("https://example.com/"), Duration::from_millis(1))
                .collect::<Vec<_>>()
                .await,
        );
        assert_eq!(evs.len(), 4);
        assert!(matches!(evs[0], StreamEvent::Start { .. }));
        assert_eq!(
            evs[1],
            StreamEvent::CachedResult {
                result_id: Some("abc".to_string())
            }
        );
        assert!(matches!(evs[2], StreamEvent::Complete { .. }));
        assert_eq!(evs[3], StreamEvent::End);
    }

    #[tokio::test]
    async fn test_error_stream_has_no_start() {
        let evs = events(&error_stream("Invalid URL format".to_string()).collect::<Vec<_>>().await);
        assert_eq!(
            evs,
            vec![
                StreamEvent::Error {
                    message: "Invalid URL format".to_string()
                },
                StreamEvent::End
            ]
        );
    }
}
