//! Streaming Session
//!
//! A cancellable, lazily consumed sequence of [`StreamEvent`]s read from one
//! HTTP response body.
//!
//! # Architecture
//!
//! ```text
//! response body ──► reader task ──► bounded mpsc ──► StreamingSession
//!                   FrameDecoder                     next_event() / Stream
//!                   EventClassifier
//! ```
//!
//! The reader task owns the byte stream. It suspends only while waiting for
//! the next fragment or while handing an event to the channel, and both
//! waits race against the session's [`CancellationToken`]. Whatever path
//! the reader leaves by, the byte stream is dropped exactly once before the
//! task returns its [`ReaderSummary`].
//!
//! A line longer than the decoder's limit ends the stream with one
//! `Err(ApiError::Read)`, the same as a failed read.
//!
//! Dropping the session cancels the token and aborts the task, so a
//! forgotten session never keeps a connection open.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{check_status, ApiClient};
use crate::error::ApiError;
use crate::events::{StreamEvent, StreamKind};
use crate::streaming::classifier::{ClassifierStats, EventClassifier};
use crate::streaming::request::StreamRequest;
use crate::transport::FrameDecoder;

/// Item produced by a session
pub type SessionItem = Result<StreamEvent, ApiError>;

/// Boxed fragment source owned by the reader task
type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

// ============================================================================
// Reader Summary
// ============================================================================

/// Why the reader task stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    /// A `Done` event was delivered
    Done,
    /// The body ended without a `Done` event
    EndOfStream,
    /// The cancellation token fired
    Cancelled,
    /// Reading the body failed part way through
    ReadFailed,
    /// The session stopped receiving
    ConsumerGone,
}

/// What the reader task did before it stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderSummary {
    /// Exit path taken
    pub exit: ReaderExit,
    /// Fragments read from the body
    pub fragments: u64,
    /// Bytes read from the body
    pub bytes: u64,
    /// Events handed to the session
    pub events: u64,
    /// Classifier counters at exit
    pub classifier: ClassifierStats,
}

// ============================================================================
// Streaming Session
// ============================================================================

/// Consumer side of one event stream
///
/// Yields `Ok(event)` in transport order. A mid-stream read failure is
/// yielded once as `Err(ApiError::Read)`, after which the session ends.
pub struct StreamingSession {
    kind: StreamKind,
    rx: mpsc::Receiver<SessionItem>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<ReaderSummary>>,
}

impl StreamingSession {
    /// Send a streaming request and start reading its body
    ///
    /// `cancel` is the caller's token; the session works on a child of it,
    /// so cancelling the caller's token stops the session while dropping
    /// the session leaves the caller's token untouched.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Request`] if the request never got a response
    /// - [`ApiError::Status`] for a non-success status, before any event
    /// - [`ApiError::NoBody`] for a `204` or an empty declared body
    /// - [`ApiError::Cancelled`] if `cancel` fires while connecting
    pub async fn open(
        client: &ApiClient,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<Self, ApiError> {
        let builder = client
            .stream_request(request.method.clone(), &request.path)
            .json(&request.body);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ApiError::Cancelled),
            response = builder.send() => response?,
        };

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ApiError::Cancelled),
            checked = check_status(response) => checked?,
        };

        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(ApiError::NoBody);
        }

        info!(
            path = %request.path,
            kind = %request.kind,
            status = response.status().as_u16(),
            "Opened event stream"
        );

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ApiError::Read(e.to_string())));

        Ok(Self::from_byte_stream_with_decoder(
            body,
            request.kind,
            cancel,
            client.event_buffer(),
            FrameDecoder::new().with_max_line(client.max_line_bytes()),
        ))
    }

    /// Build a session over any fragment stream
    ///
    /// Spawns the reader task, so this must be called inside a Tokio
    /// runtime.
    pub fn from_byte_stream<S>(
        stream: S,
        kind: StreamKind,
        cancel: CancellationToken,
        capacity: usize,
    ) -> Self
    where
        S: Stream<Item = Result<Bytes, ApiError>> + Send + 'static,
    {
        Self::from_byte_stream_with_decoder(stream, kind, cancel, capacity, FrameDecoder::new())
    }

    /// Build a session over any fragment stream with a configured decoder
    pub fn from_byte_stream_with_decoder<S>(
        stream: S,
        kind: StreamKind,
        cancel: CancellationToken,
        capacity: usize,
        decoder: FrameDecoder,
    ) -> Self
    where
        S: Stream<Item = Result<Bytes, ApiError>> + Send + 'static,
    {
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reader = tokio::spawn(run_reader(
            Box::pin(stream),
            kind,
            decoder,
            tx,
            cancel.clone(),
        ));

        Self {
            kind,
            rx,
            cancel,
            reader: Some(reader),
        }
    }

    /// Which transport this session consumes
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Next event, or `None` once the stream has ended or was cancelled
    pub async fn next_event(&mut self) -> Option<SessionItem> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Stop the session; no event is yielded after this returns
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop receiving and wait for the reader to exit
    ///
    /// A reader blocked on a silent connection only exits once the session
    /// is cancelled, so call [`StreamingSession::cancel`] first unless the
    /// stream has already ended.
    pub async fn finish(mut self) -> Option<ReaderSummary> {
        self.rx.close();
        let reader = self.reader.take()?;
        match reader.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Stream reader task did not complete");
                None
            }
        }
    }
}

impl Stream for StreamingSession {
    type Item = SessionItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("kind", &self.kind)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reader Task
// ============================================================================

enum Forward {
    Sent,
    Cancelled,
    Closed,
}

async fn forward(
    tx: &mpsc::Sender<SessionItem>,
    cancel: &CancellationToken,
    item: SessionItem,
) -> Forward {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Forward::Cancelled,
        sent = tx.send(item) => if sent.is_ok() { Forward::Sent } else { Forward::Closed },
    }
}

async fn run_reader(
    mut stream: ByteStream,
    kind: StreamKind,
    mut decoder: FrameDecoder,
    tx: mpsc::Sender<SessionItem>,
    cancel: CancellationToken,
) -> ReaderSummary {
    let mut classifier = EventClassifier::new(kind);
    let mut fragments = 0u64;
    let mut bytes = 0u64;
    let mut events = 0u64;

    let exit = 'read: loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break ReaderExit::Cancelled,
            next = stream.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!(kind = %kind, error = %e, "Event stream read failed");
                if let Forward::Sent = forward(&tx, &cancel, Err(e)).await {
                    events += 1;
                }
                break ReaderExit::ReadFailed;
            }
            None => {
                decoder.finish();
                break ReaderExit::EndOfStream;
            }
        };

        fragments += 1;
        bytes += chunk.len() as u64;
        decoder.push(&chunk);

        loop {
            let line = match decoder.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Event stream line rejected");
                    let item = Err(ApiError::Read(e.to_string()));
                    if let Forward::Sent = forward(&tx, &cancel, item).await {
                        events += 1;
                    }
                    break 'read ReaderExit::ReadFailed;
                }
            };
            let Some(event) = classifier.classify_line(&line) else {
                continue;
            };
            let done = event.is_done();

            match forward(&tx, &cancel, Ok(event)).await {
                Forward::Sent => events += 1,
                Forward::Cancelled => break 'read ReaderExit::Cancelled,
                Forward::Closed => break 'read ReaderExit::ConsumerGone,
            }

            if done {
                break 'read ReaderExit::Done;
            }
        }
    };

    drop(stream);

    let summary = ReaderSummary {
        exit,
        fragments,
        bytes,
        events,
        classifier: classifier.stats(),
    };
    debug!(kind = %kind, ?summary, "Event stream reader stopped");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn fragments(parts: &[&'static str]) -> Vec<Result<Bytes, ApiError>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect()
    }

    async fn collect(mut session: StreamingSession) -> Vec<SessionItem> {
        let mut items = Vec::new();
        while let Some(item) = session.next_event().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_chat_stream_events_in_order() {
        let session = StreamingSession::from_byte_stream(
            stream::iter(fragments(&[
                "data: {\"type\":\"metadata\",\"session_id\":\"s1\"}\n\n",
                "data: {\"type\":\"token\",\"content\":\"Hel",
                "lo\"}\n\ndata: [DONE]\n\n",
            ])),
            StreamKind::Chat,
            CancellationToken::new(),
            8,
        );

        let kinds: Vec<&str> = collect(session)
            .await
            .into_iter()
            .map(|item| item.unwrap().kind())
            .collect();
        assert_eq!(kinds, vec!["metadata", "token", "done"]);
    }

    #[tokio::test]
    async fn test_done_stops_reading() {
        let mut session = StreamingSession::from_byte_stream(
            stream::iter(fragments(&[
                "data: [DONE]\n\n",
                "data: {\"type\":\"token\",\"content\":\"late\"}\n\n",
            ])),
            StreamKind::Chat,
            CancellationToken::new(),
            8,
        );

        assert_eq!(session.next_event().await.unwrap().unwrap(), StreamEvent::Done);
        assert!(session.next_event().await.is_none());

        let summary = session.finish().await.unwrap();
        assert_eq!(summary.exit, ReaderExit::Done);
        assert_eq!(summary.events, 1);
    }

    #[tokio::test]
    async fn test_end_without_done_is_normal() {
        let mut session = StreamingSession::from_byte_stream(
            stream::iter(fragments(&["data: {\"phase\":\"plan\"}\n\ndata: {\"pha"])),
            StreamKind::Research,
            CancellationToken::new(),
            8,
        );
        assert!(matches!(
            session.next_event().await,
            Some(Ok(StreamEvent::Progress(_)))
        ));
        assert!(session.next_event().await.is_none());
        assert_eq!(session.finish().await.unwrap().exit, ReaderExit::EndOfStream);
    }

    #[tokio::test]
    async fn test_read_failure_yields_one_error() {
        let parts = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"token\",\"content\":\"a\"}\n")),
            Err(ApiError::Read("connection reset".to_string())),
            Ok(Bytes::from_static(b"data: {\"type\":\"token\",\"content\":\"b\"}\n")),
        ];
        let items = collect(StreamingSession::from_byte_stream(
            stream::iter(parts),
            StreamKind::Chat,
            CancellationToken::new(),
            8,
        ))
        .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ApiError::Read(_))));
    }

    #[tokio::test]
    async fn test_oversized_line_ends_stream() {
        let body = stream::iter(fragments(&[
            "data: {\"type\":\"token\",\"content\":\"a\"}\n",
            "data: xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
            "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
        ]))
        .chain(stream::pending());
        let mut session = StreamingSession::from_byte_stream_with_decoder(
            body,
            StreamKind::Chat,
            CancellationToken::new(),
            8,
            FrameDecoder::new().with_max_line(64),
        );

        assert_eq!(
            session.next_event().await.unwrap().unwrap(),
            StreamEvent::Token("a".to_string())
        );
        assert!(matches!(
            session.next_event().await,
            Some(Err(ApiError::Read(_)))
        ));
        assert!(session.next_event().await.is_none());

        let summary = session.finish().await.unwrap();
        assert_eq!(summary.exit, ReaderExit::ReadFailed);
        assert_eq!(summary.events, 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_yielding() {
        let body = stream::iter(fragments(&["data: {\"type\":\"token\",\"content\":\"a\"}\n"]))
            .chain(stream::pending());
        let mut session =
            StreamingSession::from_byte_stream(body, StreamKind::Chat, CancellationToken::new(), 8);

        assert!(session.next_event().await.is_some());
        session.cancel();
        assert!(session.next_event().await.is_none());
        assert_eq!(session.finish().await.unwrap().exit, ReaderExit::Cancelled);
    }

    #[tokio::test]
    async fn test_parent_token_cancels_session() {
        let parent = CancellationToken::new();
        let mut session = StreamingSession::from_byte_stream(
            stream::pending::<Result<Bytes, ApiError>>(),
            StreamKind::Chat,
            parent.clone(),
            8,
        );
        parent.cancel();
        assert!(session.is_cancelled());
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_leaves_parent_token_alone() {
        let parent = CancellationToken::new();
        let session = StreamingSession::from_byte_stream(
            stream::pending::<Result<Bytes, ApiError>>(),
            StreamKind::Chat,
            parent.clone(),
            8,
        );
        drop(session);
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_poll_after_cancel_is_ready_none() {
        use tokio_test::{assert_pending, assert_ready};

        let session = StreamingSession::from_byte_stream(
            stream::pending::<Result<Bytes, ApiError>>(),
            StreamKind::Chat,
            CancellationToken::new(),
            4,
        );
        let mut task = tokio_test::task::spawn(session);
        assert_pending!(task.poll_next());

        task.cancel();
        assert!(assert_ready!(task.poll_next()).is_none());
    }

    #[tokio::test]
    async fn test_session_as_stream() {
        let session = StreamingSession::from_byte_stream(
            stream::iter(fragments(&[
                "data: {\"type\":\"token\",\"content\":\"x\"}\r\n\r\n",
                "data: [DONE]\r\n\r\n",
            ])),
            StreamKind::Chat,
            CancellationToken::new(),
            1,
        );
        let items: Vec<SessionItem> = session.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &StreamEvent::Token("x".to_string()));
    }
}
