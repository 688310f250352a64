use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use answer_stream::{AgentModel, ClientConfig, RetryConfig, StreamingRequest};
use clap::Parser;

/// Ask a question and print the answer as it streams in.
#[derive(Debug, Parser)]
#[command(name = "ask", version)]
pub struct Cli {
    /// Question to submit.
    pub question: String,

    /// Workflow endpoint URL.
    #[arg(long, env = "ANSWER_STREAM_ENDPOINT")]
    pub endpoint: String,

    /// Bearer token for the endpoint.
    #[arg(long, env = "ANSWER_STREAM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Transport timeout in seconds for the whole request.
    #[arg(long, env = "ANSWER_STREAM_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Request category tag.
    #[arg(long = "type", default_value = "general")]
    pub request_type: String,

    /// Session correlation key.
    #[arg(long)]
    pub session_key: Option<String>,

    /// Enable supplementary web search.
    #[arg(long)]
    pub search: bool,

    /// Single model to answer with.
    #[arg(long, conflicts_with = "agents", required_unless_present = "agents")]
    pub model: Option<String>,

    /// Agent/model pair as `agent=model`; repeat to add more agents.
    #[arg(long = "agent", value_parser = parse_agent_model)]
    pub agents: Vec<AgentModel>,

    /// File to attach (sent base64-encoded).
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Additional attempts after the first connection failure.
    #[arg(long, env = "ANSWER_STREAM_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Base delay between attempts in milliseconds.
    #[arg(long, env = "ANSWER_STREAM_RETRY_DELAY_MS", default_value_t = 1_000)]
    pub retry_delay_ms: u64,

    /// Use a constant delay instead of exponential backoff.
    #[arg(long)]
    pub no_backoff: bool,
}

impl Cli {
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.endpoint.trim());
        if let Some(token) = self.token.as_deref().filter(|t| !t.trim().is_empty()) {
            config = config.bearer_token(token.trim());
        }
        if let Some(secs) = self.timeout_secs.filter(|s| *s > 0) {
            config = config.timeout(Duration::from_secs(secs));
        }
        config
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .max_retries(self.max_retries)
            .base_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .exponential_backoff(!self.no_backoff)
    }

    pub fn build_request(&self) -> anyhow::Result<StreamingRequest> {
        let mut builder = StreamingRequest::builder(&self.question)
            .request_type(&self.request_type)
            .searching(self.search);
        if let Some(key) = &self.session_key {
            builder = builder.session_key(key);
        }
        builder = match &self.model {
            Some(model) => builder.model(model),
            None => builder.agent_models(self.agents.clone()),
        };
        if let Some(path) = &self.file {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read attachment {}", path.display()))?;
            builder = builder.file_bytes(&bytes);
        }
        Ok(builder.build()?)
    }
}

fn parse_agent_model(raw: &str) -> Result<AgentModel, String> {
    let (agent, model) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected agent=model, got `{raw}`"))?;
    Ok(AgentModel::new(agent.trim(), model.trim()))
}
