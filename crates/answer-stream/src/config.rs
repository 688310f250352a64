use std::time::Duration;

use crate::errors::StreamError;

/// Connection settings for the workflow endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Full URL of the SSE endpoint that accepts the question POST.
    pub endpoint_url: String,
    /// Optional bearer token forwarded to the endpoint.
    pub bearer_token: Option<String>,
    /// Optional transport-level timeout for the whole request.
    ///
    /// Leave unset for long answers; a stalled stream is better handled by
    /// cancelling from the caller.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            bearer_token: None,
            timeout: None,
        }
    }

    /// Builds a config from `ANSWER_STREAM_ENDPOINT`, `ANSWER_STREAM_TOKEN`
    /// and `ANSWER_STREAM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, StreamError> {
        let endpoint = std::env::var("ANSWER_STREAM_ENDPOINT").unwrap_or_default();
        if endpoint.trim().is_empty() {
            return Err(StreamError::Config(
                "missing ANSWER_STREAM_ENDPOINT for streaming client".into(),
            ));
        }
        let mut config = Self::new(endpoint.trim());

        if let Ok(token) = std::env::var("ANSWER_STREAM_TOKEN")
            && !token.trim().is_empty()
        {
            config = config.bearer_token(token.trim());
        }

        if let Ok(raw) = std::env::var("ANSWER_STREAM_TIMEOUT_SECS") {
            config = config.timeout(parse_timeout_secs(&raw)?);
        }
        Ok(config)
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        let url = self.endpoint_url.trim();
        if url.is_empty() {
            return Err(StreamError::Config("endpoint url must not be empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(StreamError::Config(format!(
                "endpoint url must be http(s): {url}"
            )));
        }
        Ok(())
    }
}

fn parse_timeout_secs(raw: &str) -> Result<Duration, StreamError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(StreamError::Config(format!(
            "ANSWER_STREAM_TIMEOUT_SECS must be a positive integer, got `{raw}`"
        ))),
    }
}
