use std::fmt;

use chrono::{DateTime, Utc};

/// Discriminant of a server-sent chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Server acknowledged the request and is preparing an answer.
    Connecting,
    /// Incremental answer text.
    Chunk,
    /// Answer is finished.
    Complete,
    /// Server-side failure; `content` carries the message.
    Error,
}

/// One event emitted by the workflow endpoint.
///
/// Arrival order is authoritative; `timestamp` is advisory only.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamingChunk {
    /// Text payload, empty for most non-`chunk` types.
    #[serde(default)]
    pub content: String,
    /// Event discriminant.
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    /// Server-asserted emission time (ISO-8601).
    #[serde(default)]
    pub timestamp: String,
}

impl StreamingChunk {
    /// Creates a chunk stamped with the current UTC time.
    pub fn new(chunk_type: ChunkType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            chunk_type,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ChunkType::Chunk, content)
    }

    pub fn complete() -> Self {
        Self::new(ChunkType::Complete, "")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ChunkType::Error, message)
    }

    /// Parses the advisory timestamp, if it is valid RFC 3339.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Lifecycle state of a streaming session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingStatus {
    #[default]
    Connecting,
    Streaming,
    Complete,
    Error,
    Cancelled,
}

impl StreamingStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// Whether `self -> next` is an allowed session transition.
    pub fn can_transition_to(self, next: StreamingStatus) -> bool {
        use StreamingStatus::*;
        match (self, next) {
            (Connecting, Streaming | Complete | Error | Cancelled) => true,
            (Streaming, Complete | Error | Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StreamingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
