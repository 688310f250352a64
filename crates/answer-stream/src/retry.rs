use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chunk::{StreamingChunk, StreamingStatus};
use crate::client::{AbortHandle, StreamingClient};
use crate::errors::StreamError;
use crate::observer::StreamObserver;
use crate::request::StreamingRequest;
use crate::transport::Transport;

/// Message fragments that mark a request as unauthenticated or malformed.
/// These fail identically on every attempt.
const NON_RETRYABLE_MARKERS: &[&str] = &["Unauthorized", "Forbidden", "validation", "required fields"];

/// Upper bound of the random jitter, as a fraction of the exponential delay.
const JITTER_RATIO: f64 = 0.1;

/// Retry settings for establishing a streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    /// Doubles the delay per attempt when set; otherwise the base delay is
    /// used for every retry.
    #[serde(default = "default_use_exponential_backoff")]
    pub use_exponential_backoff: bool,
    /// Cap for a single exponential delay, jitter included.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Error names or message fragments that are worth retrying.
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_retry_delay_ms() -> u64 {
    1_000
}

const fn default_use_exponential_backoff() -> bool {
    true
}

const fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_retryable_errors() -> Vec<String> {
    [
        "NetworkError",
        "TimeoutError",
        "ConnectionError",
        "ECONNREFUSED",
        "ECONNRESET",
        "ETIMEDOUT",
        "fetch failed",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            use_exponential_backoff: default_use_exponential_backoff(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

impl RetryConfig {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    pub fn retryable_errors(mut self, codes: Vec<String>) -> Self {
        self.retryable_errors = codes;
        self
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retrying after failed attempt `attempt` (0-indexed), with
    /// fresh random jitter.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_RATIO);
        self.delay_with_jitter(attempt, jitter)
    }

    fn delay_with_jitter(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        if !self.use_exponential_backoff {
            return Duration::from_millis(self.base_retry_delay_ms);
        }
        let exponential = self
            .base_retry_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt)) as f64;
        let total = (exponential + exponential * jitter_fraction).min(self.max_retry_delay_ms as f64);
        Duration::from_millis(total.round() as u64)
    }

    /// Classifies an error as worth retrying.
    ///
    /// Auth and validation failures never are; otherwise the error's name or
    /// message must match one of `retryable_errors`.
    pub fn is_retryable(&self, err: &StreamError) -> bool {
        if err.is_cancelled() {
            return false;
        }
        let message = err.to_string();
        if NON_RETRYABLE_MARKERS.iter().any(|marker| message.contains(marker)) {
            return false;
        }
        let name = err.name();
        self.retryable_errors
            .iter()
            .any(|code| message.contains(code.as_str()) || name.contains(code.as_str()))
    }
}

/// Result of a single connection attempt.
pub enum AttemptOutcome {
    /// Event stream established; drive it with [`StreamingClient::run`].
    Started(StreamingClient),
    /// Attempt failed before the stream was established.
    Failed { error: StreamError, retryable: bool },
}

/// Establishes a streaming session, retrying transient failures.
///
/// Every attempt uses a fresh [`StreamingClient`]. The orchestrator is done
/// once a session is established; faults after that point reach the caller's
/// observer directly and are not retried.
pub struct RetryingStreamer {
    transport: Arc<dyn Transport>,
    config: RetryConfig,
    abort: AbortHandle,
    started: AtomicBool,
}

impl RetryingStreamer {
    pub fn new(transport: Arc<dyn Transport>, config: RetryConfig) -> Self {
        Self {
            transport,
            config,
            abort: AbortHandle::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Cancels the current attempt or backoff wait, and the established
    /// session afterwards.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_retryable(&self, err: &StreamError) -> bool {
        self.config.is_retryable(err)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.config.retry_delay(attempt)
    }

    /// Attempts to establish a session up to `max_retries + 1` times.
    ///
    /// Failed non-final attempts are hidden from `observer`; a terminal
    /// failure is reported to it exactly once. An abort requested before the
    /// first call is honored; later calls start with a re-armed handle.
    pub async fn start(
        &self,
        request: &StreamingRequest,
        observer: Arc<dyn StreamObserver>,
    ) -> Result<StreamingClient, StreamError> {
        if self.started.swap(true, Ordering::SeqCst) {
            self.abort.rearm();
        }
        let max_attempts = self.config.max_attempts();
        let mut abort_rx = self.abort.subscribe();

        for attempt in 0..max_attempts {
            let error = match self.attempt(request, Arc::clone(&observer)).await {
                AttemptOutcome::Started(client) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, correlation_id = %request.correlation_id(), "streaming session established after retry");
                    }
                    return Ok(client);
                }
                AttemptOutcome::Failed {
                    error: StreamError::Cancelled,
                    ..
                } => return Err(StreamError::Cancelled),
                AttemptOutcome::Failed { error, retryable } => {
                    if attempt + 1 == max_attempts {
                        StreamError::RetriesExhausted {
                            attempts: max_attempts,
                            source: Box::new(error),
                        }
                    } else if !retryable {
                        warn!(attempt = attempt + 1, error = %error, "non-retryable streaming failure");
                        error
                    } else {
                        let delay = self.config.retry_delay(attempt);
                        warn!(
                            attempt = attempt + 1,
                            max_attempts,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %error,
                            "streaming attempt failed; retrying"
                        );
                        let aborted = tokio::select! {
                            biased;
                            _ = AbortHandle::aborted(&mut abort_rx) => true,
                            _ = tokio::time::sleep(delay) => false,
                        };
                        if aborted {
                            info!(correlation_id = %request.correlation_id(), "retry cancelled during backoff");
                            observer.on_status_change(StreamingStatus::Cancelled);
                            return Err(StreamError::Cancelled);
                        }
                        continue;
                    }
                }
            };
            return Err(report_failure(observer.as_ref(), error));
        }

        Err(StreamError::protocol("retry loop made no attempts"))
    }

    /// Runs one attempt with a fresh client.
    pub async fn attempt(
        &self,
        request: &StreamingRequest,
        observer: Arc<dyn StreamObserver>,
    ) -> AttemptOutcome {
        let gate = Arc::new(AttemptObserver::new(observer));
        let mut client = StreamingClient::with_abort_handle(
            Arc::clone(&self.transport),
            gate.clone(),
            self.abort.clone(),
        );
        match client.connect(request).await {
            Ok(()) => {
                gate.establish();
                AttemptOutcome::Started(client)
            }
            Err(error) => {
                let retryable = self.is_retryable(&error);
                AttemptOutcome::Failed { error, retryable }
            }
        }
    }
}

fn report_failure(observer: &dyn StreamObserver, err: StreamError) -> StreamError {
    error!(error = %err, "streaming session could not be established");
    observer.on_status_change(StreamingStatus::Error);
    observer.on_error(&err.to_string());
    err
}

/// Forwards an attempt's callbacks to the caller, holding back failures
/// until the session is established so the orchestrator decides what the
/// caller sees.
struct AttemptObserver {
    inner: Arc<dyn StreamObserver>,
    established: AtomicBool,
}

impl AttemptObserver {
    fn new(inner: Arc<dyn StreamObserver>) -> Self {
        Self {
            inner,
            established: AtomicBool::new(false),
        }
    }

    fn establish(&self) {
        self.established.store(true, Ordering::SeqCst);
    }

    fn is_established(&self) -> bool {
        self.established.load(Ordering::SeqCst)
    }
}

impl StreamObserver for AttemptObserver {
    fn on_chunk(&self, chunk: &StreamingChunk) {
        self.inner.on_chunk(chunk);
    }

    fn on_complete(&self, content: &str) {
        self.inner.on_complete(content);
    }

    fn on_error(&self, message: &str) {
        if self.is_established() {
            self.inner.on_error(message);
        }
    }

    fn on_status_change(&self, status: StreamingStatus) {
        if status == StreamingStatus::Error && !self.is_established() {
            return;
        }
        self.inner.on_status_change(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingObserver, Scripted, ScriptedTransport, data_line, request};

    fn streamer(
        script: Vec<Scripted>,
        config: RetryConfig,
    ) -> (RetryingStreamer, Arc<ScriptedTransport>, Arc<RecordingObserver>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let streamer = RetryingStreamer::new(transport.clone(), config);
        (streamer, transport, Arc::new(RecordingObserver::default()))
    }

    fn network_failure() -> Scripted {
        Scripted::Fail(StreamError::Network("NetworkError when attempting to fetch resource".into()))
    }

    #[test]
    fn config_defaults_and_partial_deserialization() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_retries":5}"#).expect("config");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_retry_delay_ms, 1_000);
        assert!(config.use_exponential_backoff);
        assert_eq!(config.max_retry_delay_ms, 10_000);
        assert!(config.retryable_errors.iter().any(|c| c == "NetworkError"));
        assert_eq!(RetryConfig::default().max_attempts(), 4);
    }

    #[test]
    fn exponential_backoff_grows_with_jitter_and_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_with_jitter(0, 0.0).as_millis(), 1_000);
        assert_eq!(config.delay_with_jitter(1, 0.0).as_millis(), 2_000);
        assert_eq!(config.delay_with_jitter(3, 0.1).as_millis(), 8_800);
        assert_eq!(config.delay_with_jitter(4, 0.0).as_millis(), 10_000);
        assert_eq!(config.delay_with_jitter(40, 0.1).as_millis(), 10_000);

        for _ in 0..50 {
            let delay = config.retry_delay(2).as_millis();
            assert!((4_000..=4_400).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn linear_backoff_uses_base_delay() {
        let config = RetryConfig::default()
            .exponential_backoff(false)
            .base_retry_delay(Duration::from_millis(250));
        assert_eq!(config.retry_delay(0), Duration::from_millis(250));
        assert_eq!(config.retry_delay(5), Duration::from_millis(250));
    }

    #[test]
    fn classification_rules() {
        let config = RetryConfig::default();
        assert!(config.is_retryable(&StreamError::Network("reset".into())));
        assert!(config.is_retryable(&StreamError::Timeout("slow".into())));
        assert!(config.is_retryable(&StreamError::Server("NetworkError upstream".into())));
        assert!(!config.is_retryable(&StreamError::Http {
            status: 401,
            message: "Unauthorized".into()
        }));
        assert!(!config.is_retryable(&StreamError::Network("Forbidden by proxy".into())));
        assert!(!config.is_retryable(&StreamError::Validation("question".into())));
        assert!(!config.is_retryable(&StreamError::Http {
            status: 400,
            message: "missing required fields".into()
        }));
        assert!(!config.is_retryable(&StreamError::NotEventStream));
        assert!(!config.is_retryable(&StreamError::Server("something odd".into())));
        assert!(!config.is_retryable(&StreamError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_attempted_exactly_once() {
        let (streamer, transport, observer) = streamer(
            vec![
                Scripted::respond(401, "application/json", r#"{"error":"Unauthorized"}"#),
                Scripted::stream(vec![data_line("complete", "")]),
            ],
            RetryConfig::default(),
        );
        let err = match streamer.start(&request(), observer.clone()).await {
            Ok(_) => panic!("unauthorized should fail"),
            Err(err) => err,
        };
        assert_eq!(err.to_string(), "Unauthorized");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.errors(), vec!["Unauthorized".to_string()]);
        assert_eq!(observer.statuses().last(), Some(&StreamingStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried_until_exhausted() {
        let (streamer, transport, observer) = streamer(
            (0..4).map(|_| network_failure()).collect(),
            RetryConfig::default().max_retries(3),
        );
        let err = match streamer.start(&request(), observer.clone()).await {
            Ok(_) => panic!("all attempts fail"),
            Err(err) => err,
        };
        assert!(matches!(err, StreamError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);

        let errors = observer.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Failed after 4 attempts: "));
        assert!(errors[0].contains("NetworkError"));
        let error_statuses = observer
            .statuses()
            .into_iter()
            .filter(|s| *s == StreamingStatus::Error)
            .count();
        assert_eq!(error_statuses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure_and_caller_drives_the_session() {
        let (streamer, transport, observer) = streamer(
            vec![
                network_failure(),
                Scripted::stream(vec![data_line("chunk", "hi"), data_line("complete", "")]),
            ],
            RetryConfig::default(),
        );
        let mut client = match streamer.start(&request(), observer.clone()).await {
            Ok(client) => client,
            Err(err) => panic!("should recover: {err}"),
        };
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert!(observer.errors().is_empty());

        let status = client.run().await.expect("run");
        assert_eq!(status, StreamingStatus::Complete);
        assert_eq!(observer.completions(), vec!["hi".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_failure_fails_fast() {
        let (streamer, transport, observer) = streamer(
            vec![
                Scripted::respond(200, "application/json", "{}"),
                Scripted::stream(vec![data_line("complete", "")]),
            ],
            RetryConfig::default(),
        );
        let result = streamer.start(&request(), observer.clone()).await;
        assert!(matches!(result, Err(StreamError::NotEventStream)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.errors(),
            vec!["Response is not an event stream".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn final_attempt_error_is_wrapped_even_when_not_retryable() {
        let (streamer, _, observer) = streamer(
            vec![Scripted::respond(403, "application/json", r#"{"error":"Forbidden"}"#)],
            RetryConfig::default().max_retries(0),
        );
        let result = streamer.start(&request(), observer.clone()).await;
        assert!(matches!(result, Err(StreamError::RetriesExhausted { attempts: 1, .. })));
        assert_eq!(
            observer.errors(),
            vec!["Failed after 1 attempts: Forbidden".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abort_during_backoff_cancels_without_error() {
        let (streamer, transport, observer) = streamer(
            vec![network_failure(), network_failure()],
            RetryConfig::default().base_retry_delay(Duration::from_secs(60)),
        );
        let handle = streamer.abort_handle();
        let req = request();

        let (result, ()) = tokio::join!(streamer.start(&req, observer.clone()), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.abort();
        });

        assert!(matches!(result, Err(StreamError::Cancelled)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(observer.errors().is_empty());
        assert_eq!(observer.statuses().last(), Some(&StreamingStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn streamer_is_reusable_after_an_abort() {
        let (streamer, transport, observer) = streamer(
            vec![Scripted::stream(vec![data_line("chunk", "again"), data_line("complete", "")])],
            RetryConfig::default(),
        );
        streamer.abort_handle().abort();
        let first = streamer.start(&request(), observer.clone()).await;
        assert!(matches!(first, Err(StreamError::Cancelled)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        let mut client = match streamer.start(&request(), observer.clone()).await {
            Ok(client) => client,
            Err(err) => panic!("second start should connect: {err}"),
        };
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.run().await.expect("run"), StreamingStatus::Complete);
        assert_eq!(observer.completions(), vec!["again".to_string()]);
    }
}
