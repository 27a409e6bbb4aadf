//! Streaming ingestion of model output
//!
//! ```text
//! ┌──────────────┐    ┌─────────────────┐    ┌────────────────┐    ┌───────────┐
//! │ SSE / raw    │ ─► │ consume_stream  │ ─► │ TagStreamParser│ ─► │ EventSink │
//! │ text chunks  │    │ (one consumer)  │    │                │    │           │
//! └──────────────┘    └─────────────────┘    └────────────────┘    └───────────┘
//! ```
//!
//! One consumer reads one chunk at a time and scans it synchronously before
//! awaiting the next. Cancellation is cooperative: once the [`CancelFlag`]
//! trips, no further chunk is read and nothing still buffered is flushed.

pub mod grammar;
mod parser;
mod sink;
pub mod sse;

pub use parser::{parse_document, ParserEvent, TagStreamParser};
pub use sink::{dispatch, EventSink};
pub use sse::{raw_text_stream, sse_text_stream, SseDecoder, SseFrame};

use crate::error::Result;
use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation token shared between a stream consumer and
/// whoever may stop it (e.g. a Ctrl-C handler).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of consuming one stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Chunks read from the source
    pub chunks: usize,
    /// Events dispatched to the sink
    pub events: usize,
    /// Stopped by the cancel flag before the source ended
    pub cancelled: bool,
}

/// Drive one stream of text chunks through a fresh parser into `sink`.
///
/// A source error aborts the consumer and is returned; events dispatched
/// before it stay applied. Sink errors abort the same way.
pub async fn consume_stream<St, S>(
    chunks: St,
    sink: &mut S,
    cancel: &CancelFlag,
) -> Result<StreamSummary>
where
    St: Stream<Item = Result<String>>,
    S: EventSink + ?Sized,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut parser = TagStreamParser::new();
    let mut summary = StreamSummary::default();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            next = chunks.next() => Some(next),
        };

        let chunk = match next {
            None => {
                tracing::info!(
                    chunks = summary.chunks,
                    events = summary.events,
                    "Stream cancelled"
                );
                parser.cancel();
                summary.cancelled = true;
                return Ok(summary);
            }
            Some(None) => break,
            Some(Some(Err(e))) => {
                tracing::warn!(error = %e, chunks = summary.chunks, "Stream source failed");
                parser.cancel();
                return Err(e);
            }
            Some(Some(Ok(chunk))) => chunk,
        };

        summary.chunks += 1;
        for event in parser.feed(&chunk) {
            dispatch(sink, &event)?;
            summary.events += 1;
        }
    }

    for event in parser.finish() {
        dispatch(sink, &event)?;
        summary.events += 1;
    }

    tracing::debug!(
        chunks = summary.chunks,
        events = summary.events,
        "Stream consumed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<String>> {
        let owned: Vec<Result<String>> = parts.iter().map(|p| Ok(p.to_string())).collect();
        futures::stream::iter(owned)
    }

    #[tokio::test]
    async fn test_consume_stream_dispatches_in_order() {
        let mut events: Vec<ParserEvent> = Vec::new();
        let summary = consume_stream(
            chunks(&["intro <wri", "te file_path=\"a.txt\">A</wr", "ite> outro"]),
            &mut events,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.events, 3);
        assert!(!summary.cancelled);
        assert_eq!(
            events,
            vec![
                ParserEvent::Narrative("intro".to_string()),
                ParserEvent::FileWrite {
                    path: "a.txt".to_string(),
                    content: "A".to_string()
                },
                ParserEvent::Narrative("outro".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reads_nothing() {
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut events: Vec<ParserEvent> = Vec::new();
        let summary = consume_stream(chunks(&["hello"]), &mut events, &cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.chunks, 0);
        assert!(events.is_empty());
    }

    /// Collects events and signals once the first one arrives.
    struct SignallingSink {
        events: Vec<ParserEvent>,
        first: Option<tokio::sync::oneshot::Sender<()>>,
    }

    impl SignallingSink {
        fn record(&mut self, event: ParserEvent) -> Result<()> {
            self.events.push(event);
            if let Some(first) = self.first.take() {
                let _ = first.send(());
            }
            Ok(())
        }
    }

    impl EventSink for SignallingSink {
        fn on_narrative(&mut self, text: &str) -> Result<()> {
            self.record(ParserEvent::Narrative(text.to_string()))
        }

        fn on_thinking(&mut self, text: &str) -> Result<()> {
            self.record(ParserEvent::Thinking(text.to_string()))
        }

        fn on_write(&mut self, path: &str, content: &str) -> Result<()> {
            self.record(ParserEvent::FileWrite {
                path: path.to_string(),
                content: content.to_string(),
            })
        }

        fn on_delete(&mut self, path: &str) -> Result<()> {
            self.record(ParserEvent::FileDelete {
                path: path.to_string(),
            })
        }

        fn on_rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
            self.record(ParserEvent::FileRename {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
            })
        }

        fn on_dependency(&mut self, package: &str) -> Result<()> {
            self.record(ParserEvent::DependencyRequest(package.to_string()))
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_discards_buffered_text() {
        crate::logging::init_test();
        let cancel = CancelFlag::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<String>>();
        let source = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        tx.send(Ok("first. <thinking>never closed".to_string()))
            .unwrap();

        let (first_tx, first_rx) = tokio::sync::oneshot::channel();
        let consumer_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut sink = SignallingSink {
                events: Vec::new(),
                first: Some(first_tx),
            };
            let summary = consume_stream(source, &mut sink, &consumer_cancel).await;
            (summary, sink.events)
        });

        // The first chunk has been scanned once its narrative is out.
        first_rx.await.unwrap();
        cancel.cancel();

        let (summary, events) = handle.await.unwrap();
        let summary = summary.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.chunks, 1);
        assert_eq!(events, vec![ParserEvent::Narrative("first.".to_string())]);
        drop(tx);
    }

    #[tokio::test]
    async fn test_source_error_aborts() {
        let items: Vec<Result<String>> = vec![
            Ok("ok <delete file_path=\"x\" />".to_string()),
            Err(Error::Stream("upstream closed".to_string())),
            Ok("never seen".to_string()),
        ];
        let mut events: Vec<ParserEvent> = Vec::new();
        let result = consume_stream(futures::stream::iter(items), &mut events, &CancelFlag::new()).await;

        assert!(matches!(result, Err(Error::Stream(_))));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_sse_source_end_to_end() {
        let input: &[u8] = b"data: {\"text\": \"<write file_path=\\\"a.md\\\">\"}\n\ndata: {\"text\": \"# Title</write>\"}\n\ndata: [DONE]\n\n";
        let mut events: Vec<ParserEvent> = Vec::new();
        consume_stream(sse_text_stream(input, 7), &mut events, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(
            events,
            vec![ParserEvent::FileWrite {
                path: "a.md".to_string(),
                content: "# Title".to_string()
            }]
        );
    }
}
