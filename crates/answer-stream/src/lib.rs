//! Client for question/answer workflows that stream their answer as
//! Server-Sent Events.
//!
//! A [`StreamingClient`] runs one session: it posts a [`StreamingRequest`],
//! decodes `data:` lines into [`StreamingChunk`]s, accumulates the answer and
//! reports progress to a [`StreamObserver`]. [`RetryingStreamer`] wraps a
//! fresh client per attempt until a session is established.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use answer_stream::prelude::*;
//! use answer_stream::observer::SessionOutcome;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let transport = Arc::new(HttpTransport::from_env()?);
//! let request = StreamingRequest::builder("What changed in the last release?")
//!     .model("gpt-4o")
//!     .build()?;
//!
//! let (observer, events) = event_channel();
//! let streamer = RetryingStreamer::new(transport, RetryConfig::default());
//! let mut client = streamer.start(&request, Arc::new(observer)).await?;
//! client.run().await?;
//! drop(client);
//!
//! if let SessionOutcome::Completed(answer) = events.collect_answer().await {
//!     println!("{answer}");
//! }
//! # Ok(())
//! # }
//! ```

/// Overflow protection for accumulated text.
pub mod buffer;
/// Wire model shared by every component.
pub mod chunk;
/// Streaming session client and cancellation handle.
pub mod client;
/// Endpoint configuration.
pub mod config;
/// Public error type.
pub mod errors;
/// Logging bootstrap.
pub mod observability;
/// Observer callbacks and the channel-backed event stream.
pub mod observer;
/// Common imports for typical usage.
pub mod prelude;
/// Question request model and validation.
pub mod request;
/// Retry orchestration across fresh clients.
pub mod retry;
/// Incremental SSE decoding.
pub mod sse;
/// HTTP seam and the reqwest implementation.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use buffer::{BufferManager, BufferStats};
pub use chunk::{ChunkType, StreamingChunk, StreamingStatus};
pub use client::{AbortHandle, StreamingClient};
pub use config::ClientConfig;
pub use errors::StreamError;
pub use observability::{LogOutput, LogSettings, init_observability};
pub use observer::{
    ChannelObserver, EventStream, NoopObserver, StreamEvent, StreamObserver, event_channel,
};
pub use request::{AgentModel, ModelSelection, StreamingRequest, StreamingRequestBuilder};
pub use retry::{AttemptOutcome, RetryConfig, RetryingStreamer};
pub use sse::SseLineDecoder;
pub use transport::{ByteStream, HttpTransport, Transport, TransportResponse};
