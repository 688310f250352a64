/// Errors produced while establishing or consuming a streaming session.
///
/// The `Display` output of each variant is the message delivered to
/// `StreamObserver::on_error`, so it is kept free of decoration where the
/// message comes from the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Endpoint answered with a non-success status.
    #[error("{message}")]
    Http { status: u16, message: String },
    /// Endpoint answered without an event-stream content type.
    #[error("Response is not an event stream")]
    NotEventStream,
    /// Generic network failure while sending or reading.
    #[error("network error: {0}")]
    Network(String),
    /// Request or read timed out in the transport.
    #[error("timeout error: {0}")]
    Timeout(String),
    /// Connection could not be established.
    #[error("connection error: {0}")]
    Connection(String),
    /// Server emitted an `error` chunk.
    #[error("{0}")]
    Server(String),
    /// Stream closed before any content or completion signal arrived.
    #[error("Connection closed without receiving content")]
    EmptyStream,
    /// Request failed validation before being sent.
    #[error("validation error: {0}")]
    Validation(String),
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Internal misuse or an unexpected response shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Session was cancelled by the caller.
    #[error("stream cancelled")]
    Cancelled,
    /// Every retry attempt failed; wraps the last failure.
    #[error("Failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Stable class name for the error, matched by retry classification
    /// alongside the message.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Http { .. } => "HttpError",
            Self::NotEventStream => "ProtocolError",
            Self::Network(_) => "NetworkError",
            Self::Timeout(_) => "TimeoutError",
            Self::Connection(_) => "ConnectionError",
            Self::Server(_) => "ServerError",
            Self::EmptyStream => "EmptyStreamError",
            Self::Validation(_) => "ValidationError",
            Self::Config(_) => "ConfigError",
            Self::Protocol(_) => "ProtocolError",
            Self::Cancelled => "AbortError",
            Self::RetriesExhausted { .. } => "RetriesExhaustedError",
        }
    }

    /// Returns true for user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
