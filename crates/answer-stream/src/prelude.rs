//! Common imports for typical streaming usage.
pub use crate::{
    AbortHandle, AgentModel, ClientConfig, HttpTransport, RetryConfig, RetryingStreamer,
    StreamError, StreamEvent, StreamObserver, StreamingChunk, StreamingClient, StreamingRequest,
    StreamingStatus, event_channel,
};
