use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferManager, DEFAULT_MAX_BUFFER_SIZE};
use crate::chunk::{ChunkType, StreamingChunk, StreamingStatus};
use crate::errors::StreamError;
use crate::observer::StreamObserver;
use crate::request::StreamingRequest;
use crate::sse::SseLineDecoder;
use crate::transport::{ByteStream, Transport};

/// Handle used to request cancellation of a streaming session.
///
/// Clones share one flag, so a handle taken before a session starts (or
/// handed to another task) cancels whatever the owning client is doing.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests cancellation.
    ///
    /// The in-flight request or read observes it and the session ends in
    /// `StreamingStatus::Cancelled`.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub(crate) fn rearm(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once cancellation has been requested.
    pub(crate) async fn aborted(rx: &mut watch::Receiver<bool>) {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Default)]
struct Session {
    chunks: Vec<StreamingChunk>,
    content: String,
    status: StreamingStatus,
    completion_acknowledged: bool,
    started: bool,
    correlation_id: Option<String>,
    last_error: Option<StreamError>,
    reader: Option<ByteStream>,
}

enum Step {
    Aborted,
    Read(Option<Result<bytes::Bytes, StreamError>>),
}

/// Runs one question-to-answer streaming exchange.
///
/// Events are reported to the observer inline with each network read, in
/// arrival order. Use one client per concurrent session.
pub struct StreamingClient {
    transport: Arc<dyn Transport>,
    observer: Arc<dyn StreamObserver>,
    abort: AbortHandle,
    max_buffer_size: usize,
    session: Session,
}

impl StreamingClient {
    pub fn new(transport: Arc<dyn Transport>, observer: Arc<dyn StreamObserver>) -> Self {
        Self::with_abort_handle(transport, observer, AbortHandle::new())
    }

    /// Creates a client that is cancelled through an existing handle.
    pub fn with_abort_handle(
        transport: Arc<dyn Transport>,
        observer: Arc<dyn StreamObserver>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            transport,
            observer,
            abort,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            session: Session::default(),
        }
    }

    /// Overrides the overflow threshold for partially received SSE lines.
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn status(&self) -> StreamingStatus {
        self.session.status
    }

    /// Concatenation of every `chunk` content received so far.
    pub fn content(&self) -> &str {
        &self.session.content
    }

    pub fn chunks(&self) -> &[StreamingChunk] {
        &self.session.chunks
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.session.correlation_id.as_deref()
    }

    /// Connects and streams until the session reaches a terminal status.
    ///
    /// Returns `Ok(Complete)` or `Ok(Cancelled)` for non-error endings.
    /// Errors have already been reported through `on_error`.
    pub async fn start_streaming(
        &mut self,
        request: &StreamingRequest,
    ) -> Result<StreamingStatus, StreamError> {
        match self.connect(request).await {
            Ok(()) => self.run().await,
            Err(StreamError::Cancelled) => Ok(StreamingStatus::Cancelled),
            Err(err) => Err(err),
        }
    }

    /// Sends the request and validates the response head.
    ///
    /// On success the body reader is parked in the session for [`run`](Self::run).
    /// Resets any previous session on this instance first.
    pub async fn connect(&mut self, request: &StreamingRequest) -> Result<(), StreamError> {
        if self.session.started {
            self.abort.rearm();
        }
        self.session = Session {
            started: true,
            correlation_id: Some(request.correlation_id().to_string()),
            ..Session::default()
        };
        info!(correlation_id = %request.correlation_id(), "starting streaming session");
        self.observer.on_status_change(StreamingStatus::Connecting);

        let body = match request.to_body() {
            Ok(body) => body,
            Err(err) => return Err(self.fail(err)),
        };

        let transport = Arc::clone(&self.transport);
        let mut abort_rx = self.abort.subscribe();
        let sent = tokio::select! {
            biased;
            _ = AbortHandle::aborted(&mut abort_rx) => Err(StreamError::Cancelled),
            sent = transport.send(body) => sent,
        };
        let response = match sent {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err)),
        };

        if !response.is_success() {
            let status = response.status;
            let drained = tokio::select! {
                biased;
                _ = AbortHandle::aborted(&mut abort_rx) => Err(StreamError::Cancelled),
                text = response.text() => Ok(text),
            };
            let message = match drained {
                Ok(Ok(text)) => error_message_from_body(&text, status),
                Ok(Err(_)) => generic_http_message(status),
                Err(cancelled) => return Err(self.fail(cancelled)),
            };
            return Err(self.fail(StreamError::Http { status, message }));
        }
        if !response.is_event_stream() {
            return Err(self.fail(StreamError::NotEventStream));
        }

        debug!(correlation_id = ?self.session.correlation_id, "event stream established");
        self.session.reader = Some(response.body);
        Ok(())
    }

    /// Drives the byte-read loop of a connected session to a terminal status.
    pub async fn run(&mut self) -> Result<StreamingStatus, StreamError> {
        let Some(mut reader) = self.session.reader.take() else {
            if self.session.status.is_terminal() {
                return self.outcome();
            }
            return Err(StreamError::protocol(
                "run called without a connected session",
            ));
        };

        let mut decoder =
            SseLineDecoder::with_buffer_manager(BufferManager::new(self.max_buffer_size));
        let mut abort_rx = self.abort.subscribe();

        while !self.session.status.is_terminal() {
            let step = tokio::select! {
                biased;
                _ = AbortHandle::aborted(&mut abort_rx) => Step::Aborted,
                read = reader.next() => Step::Read(read),
            };
            match step {
                Step::Aborted => self.mark_cancelled(),
                Step::Read(Some(Ok(bytes))) => {
                    for chunk in decoder.push(&bytes) {
                        self.handle_chunk(chunk);
                    }
                }
                Step::Read(Some(Err(err))) => {
                    self.fail(err);
                }
                Step::Read(None) => {
                    for chunk in decoder.finish() {
                        self.handle_chunk(chunk);
                    }
                    self.handle_stream_end();
                }
            }
        }

        let stats = decoder.buffer_manager().stats();
        if stats.overflow_count > 0 {
            debug!(overflow_count = stats.overflow_count, "line buffer overflowed during session");
        }
        self.outcome()
    }

    /// Signals abort and forces a non-terminal session to `cancelled`.
    pub fn cancel(&mut self) {
        self.abort.abort();
        self.session.reader = None;
        self.mark_cancelled();
    }

    /// Cancels a started session, then clears all session state and
    /// re-arms the abort flag.
    pub fn dispose(&mut self) {
        if self.session.started {
            self.cancel();
        }
        self.session = Session::default();
        self.abort.rearm();
    }

    fn handle_chunk(&mut self, chunk: StreamingChunk) {
        if self.session.status.is_terminal() {
            debug!(status = %self.session.status, chunk_type = ?chunk.chunk_type, "ignoring chunk after terminal status");
            return;
        }
        match chunk.chunk_type {
            ChunkType::Connecting => self.set_status(StreamingStatus::Connecting),
            ChunkType::Chunk => {
                if self.session.status != StreamingStatus::Streaming {
                    self.set_status(StreamingStatus::Streaming);
                }
                self.session.content.push_str(&chunk.content);
                debug!(
                    chunk_len = chunk.content.len(),
                    total_len = self.session.content.len(),
                    "received chunk"
                );
                self.observer.on_chunk(&chunk);
                self.session.chunks.push(chunk);
            }
            ChunkType::Complete => self.complete(),
            ChunkType::Error => {
                let message = if chunk.content.trim().is_empty() {
                    "Stream error".to_string()
                } else {
                    chunk.content
                };
                self.fail(StreamError::Server(message));
            }
        }
    }

    fn handle_stream_end(&mut self) {
        if self.session.completion_acknowledged || self.session.status.is_terminal() {
            return;
        }
        if self.session.content.is_empty() {
            self.fail(StreamError::EmptyStream);
            return;
        }
        // Cannot tell a finished answer from a server crash mid-sentence.
        warn!(
            correlation_id = ?self.session.correlation_id,
            content_len = self.session.content.len(),
            "stream closed without completion event; treating accumulated content as complete (answer may be truncated)"
        );
        self.complete();
    }

    fn complete(&mut self) {
        self.session.completion_acknowledged = true;
        self.set_status(StreamingStatus::Complete);
        info!(
            correlation_id = ?self.session.correlation_id,
            content_len = self.session.content.len(),
            chunks = self.session.chunks.len(),
            "streaming session complete"
        );
        self.observer.on_complete(&self.session.content);
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        if err.is_cancelled() {
            self.mark_cancelled();
            return err;
        }
        if self.session.status.is_terminal() {
            return err;
        }
        error!(correlation_id = ?self.session.correlation_id, error = %err, "streaming session failed");
        self.session.reader = None;
        self.session.last_error = Some(err.clone());
        self.set_status(StreamingStatus::Error);
        self.observer.on_error(&err.to_string());
        err
    }

    fn mark_cancelled(&mut self) {
        if self.session.status.is_terminal() {
            return;
        }
        info!(correlation_id = ?self.session.correlation_id, "streaming session cancelled");
        self.session.reader = None;
        self.set_status(StreamingStatus::Cancelled);
    }

    fn set_status(&mut self, next: StreamingStatus) {
        let current = self.session.status;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            debug!(%current, %next, "ignoring invalid status transition");
            return;
        }
        self.session.status = next;
        debug!(%current, %next, "status changed");
        self.observer.on_status_change(next);
    }

    fn outcome(&self) -> Result<StreamingStatus, StreamError> {
        match self.session.status {
            StreamingStatus::Error => Err(self
                .session
                .last_error
                .clone()
                .unwrap_or_else(|| StreamError::protocol("session failed without an error"))),
            status => Ok(status),
        }
    }
}

fn error_message_from_body(body: &str, status: u16) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|e| e.as_str())
                .filter(|m| !m.trim().is_empty())
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| generic_http_message(status))
}

fn generic_http_message(status: u16) -> String {
    format!("HTTP error! status: {status}")
}
