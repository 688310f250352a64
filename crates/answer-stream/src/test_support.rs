//! In-memory transport and recording observer shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{StreamExt as _, stream};

use crate::chunk::{StreamingChunk, StreamingStatus};
use crate::errors::StreamError;
use crate::observer::{StreamEvent, StreamObserver};
use crate::request::StreamingRequest;
use crate::transport::{ByteStream, Transport, TransportResponse};

pub(crate) enum Scripted {
    Respond {
        status: u16,
        content_type: String,
        reads: Vec<Result<bytes::Bytes, StreamError>>,
        hang: bool,
    },
    Fail(StreamError),
}

impl Scripted {
    pub(crate) fn stream(reads: Vec<String>) -> Self {
        Self::Respond {
            status: 200,
            content_type: "text/event-stream".into(),
            reads: reads.into_iter().map(|r| Ok(r.into())).collect(),
            hang: false,
        }
    }

    /// Event stream that never ends after delivering `reads`.
    pub(crate) fn hanging_stream(reads: Vec<String>) -> Self {
        Self::Respond {
            status: 200,
            content_type: "text/event-stream".into(),
            reads: reads.into_iter().map(|r| Ok(r.into())).collect(),
            hang: true,
        }
    }

    pub(crate) fn respond(status: u16, content_type: &str, body: &str) -> Self {
        Self::Respond {
            status,
            content_type: content_type.into(),
            reads: vec![Ok(body.to_string().into())],
            hang: false,
        }
    }
}

pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _body: serde_json::Value) -> Result<TransportResponse, StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Scripted::Respond {
                status,
                content_type,
                reads,
                hang,
            }) => {
                let body: ByteStream = if hang {
                    Box::pin(stream::iter(reads).chain(stream::pending()))
                } else {
                    Box::pin(stream::iter(reads))
                };
                Ok(TransportResponse {
                    status,
                    content_type: Some(content_type),
                    body,
                })
            }
            Some(Scripted::Fail(err)) => Err(err),
            None => Err(StreamError::protocol("no scripted response left")),
        }
    }
}

/// Records every callback in order.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingObserver {
    fn push(&self, event: StreamEvent) {
        self.events.lock().expect("events lock").push(event);
    }

    pub(crate) fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub(crate) fn statuses(&self) -> Vec<StreamingStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn chunks(&self) -> Vec<StreamingChunk> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn completions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Complete(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl StreamObserver for RecordingObserver {
    fn on_chunk(&self, chunk: &StreamingChunk) {
        self.push(StreamEvent::Chunk(chunk.clone()));
    }

    fn on_complete(&self, content: &str) {
        self.push(StreamEvent::Complete(content.to_string()));
    }

    fn on_error(&self, message: &str) {
        self.push(StreamEvent::Error(message.to_string()));
    }

    fn on_status_change(&self, status: StreamingStatus) {
        self.push(StreamEvent::Status(status));
    }
}

/// One SSE event line pair with a fixed timestamp.
pub(crate) fn data_line(chunk_type: &str, content: &str) -> String {
    let payload = serde_json::json!({
        "content": content,
        "type": chunk_type,
        "timestamp": "2024-01-01T00:00:00Z",
    });
    format!("data: {payload}\n\n")
}

pub(crate) fn request() -> StreamingRequest {
    StreamingRequest::builder("How do streams work?")
        .model("test-model")
        .correlation_id("test-correlation")
        .build()
        .expect("valid request")
}
