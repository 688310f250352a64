use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::StreamError;

/// Raw response body as a stream of network reads.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Response head plus the unread body.
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Declared `content-type`, if any.
    pub content_type: Option<String>,
    /// Body reads in arrival order.
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_event_stream(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
    }

    /// Drains the body into text, used for error responses only.
    pub async fn text(self) -> Result<String, StreamError> {
        let mut body = self.body;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Sends one question POST and returns the response head and body stream.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, body: serde_json::Value) -> Result<TransportResponse, StreamError>;
}

/// reqwest-backed transport for the workflow endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(ClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: serde_json::Value) -> Result<TransportResponse, StreamError> {
        debug!(endpoint = %self.config.endpoint_url, "posting streaming request");
        let mut request = self
            .client
            .post(&self.config.endpoint_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|read| read.map_err(StreamError::from)),
        );

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn response(status: u16, content_type: Option<&str>, body: &'static str) -> TransportResponse {
        TransportResponse {
            status,
            content_type: content_type.map(ToOwned::to_owned),
            body: Box::pin(stream::iter(vec![Ok(bytes::Bytes::from_static(
                body.as_bytes(),
            ))])),
        }
    }

    #[test]
    fn event_stream_detection_ignores_case_and_parameters() {
        assert!(response(200, Some("Text/Event-Stream; charset=utf-8"), "").is_event_stream());
        assert!(!response(200, Some("application/json"), "").is_event_stream());
        assert!(!response(200, None, "").is_event_stream());
    }

    #[tokio::test]
    async fn text_drains_body() {
        let text = response(500, Some("application/json"), r#"{"error":"boom"}"#)
            .text()
            .await
            .expect("text");
        assert_eq!(text, r#"{"error":"boom"}"#);
    }

    #[test]
    fn http_transport_rejects_invalid_endpoint() {
        assert!(matches!(
            HttpTransport::new(ClientConfig::new("not-a-url")),
            Err(StreamError::Config(_))
        ));
    }
}
