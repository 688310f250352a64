use tokio::sync::mpsc;

use crate::chunk::{StreamingChunk, StreamingStatus};

/// Receives session lifecycle callbacks.
///
/// Callbacks run inline with the read loop, so implementations must return
/// quickly; slow work should be handed off (see [`event_channel`]).
pub trait StreamObserver: Send + Sync {
    /// A `chunk` event arrived; called after the accumulated content grew.
    fn on_chunk(&self, _chunk: &StreamingChunk) {}
    /// Session completed with the full accumulated answer. Called at most once.
    fn on_complete(&self, _content: &str) {}
    /// Session failed with a genuine error (never for cancellation).
    fn on_error(&self, _message: &str) {}
    /// Session status changed.
    fn on_status_change(&self, _status: StreamingStatus) {}
}

/// Observer that ignores every callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

/// Tagged form of the four observer callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Status(StreamingStatus),
    Chunk(StreamingChunk),
    Complete(String),
    Error(String),
}

impl StreamEvent {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete(_)
                | Self::Error(_)
                | Self::Status(StreamingStatus::Cancelled)
        )
    }
}

/// Observer that forwards every callback into an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelObserver {
    fn send(&self, event: StreamEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl StreamObserver for ChannelObserver {
    fn on_chunk(&self, chunk: &StreamingChunk) {
        self.send(StreamEvent::Chunk(chunk.clone()));
    }

    fn on_complete(&self, content: &str) {
        self.send(StreamEvent::Complete(content.to_string()));
    }

    fn on_error(&self, message: &str) {
        self.send(StreamEvent::Error(message.to_string()));
    }

    fn on_status_change(&self, status: StreamingStatus) {
        self.send(StreamEvent::Status(status));
    }
}

/// Receiving side of [`event_channel`].
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

/// Outcome of draining an [`EventStream`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
    /// Every sender dropped before a terminal event.
    Closed,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once every sender is dropped.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drains events until the session reaches a terminal state.
    pub async fn collect_answer(mut self) -> SessionOutcome {
        while let Some(event) = self.next_event().await {
            if !event.is_terminal() {
                continue;
            }
            return match event {
                StreamEvent::Complete(content) => SessionOutcome::Completed(content),
                StreamEvent::Error(message) => SessionOutcome::Failed(message),
                _ => SessionOutcome::Cancelled,
            };
        }
        SessionOutcome::Closed
    }
}

/// Creates a channel-backed observer and the stream that receives its events.
pub fn event_channel() -> (ChannelObserver, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelObserver { tx }, EventStream { rx })
}
