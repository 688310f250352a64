use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::errors::StreamError;

/// Agent roles the workflow endpoint accepts in an agent/model list.
pub const ALLOWED_AGENTS: &[&str] = &["coordinator", "researcher", "analyst", "writer", "reviewer"];

/// Upper bound on the decoded attachment size.
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// One participating agent role and the model that backs it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AgentModel {
    pub agent: String,
    pub model: String,
}

impl AgentModel {
    pub fn new(agent: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            model: model.into(),
        }
    }
}

/// Which model(s) answer the question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSelection {
    /// A single model answers directly.
    Single(String),
    /// An ordered, non-empty list of agent/model pairs.
    Agents(Vec<AgentModel>),
}

/// A validated question ready to be submitted.
///
/// Construct through [`StreamingRequest::builder`]; `build()` enforces the
/// request invariants so a `StreamingRequest` is always sendable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamingRequest {
    question: String,
    request_type: String,
    session_key: Option<String>,
    searching: bool,
    models: ModelSelection,
    file: Option<String>,
    correlation_id: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    question: &'a str,
    #[serde(rename = "type")]
    request_type: &'a str,
    #[serde(rename = "sessionkey", skip_serializing_if = "Option::is_none")]
    session_key: Option<&'a str>,
    searching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ai_model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_models: Option<&'a [AgentModel]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    correlation_id: &'a str,
}

impl StreamingRequest {
    /// Starts a builder for the given question.
    pub fn builder(question: impl Into<String>) -> StreamingRequestBuilder {
        StreamingRequestBuilder::new(question)
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    pub fn searching(&self) -> bool {
        self.searching
    }

    pub fn models(&self) -> &ModelSelection {
        &self.models
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Serializes the request into the JSON body the endpoint expects.
    pub fn to_body(&self) -> Result<serde_json::Value, StreamError> {
        let (ai_model, agent_models) = match &self.models {
            ModelSelection::Single(model) => (Some(model.as_str()), None),
            ModelSelection::Agents(agents) => (None, Some(agents.as_slice())),
        };
        let body = RequestBody {
            question: &self.question,
            request_type: &self.request_type,
            session_key: self.session_key.as_deref(),
            searching: self.searching,
            ai_model,
            agent_models,
            file: self.file.as_deref(),
            correlation_id: &self.correlation_id,
        };
        serde_json::to_value(body)
            .map_err(|e| StreamError::protocol(format!("failed to serialize request: {e}")))
    }
}

/// Builder for [`StreamingRequest`].
#[derive(Clone, Debug)]
pub struct StreamingRequestBuilder {
    question: String,
    request_type: String,
    session_key: Option<String>,
    searching: bool,
    models: Option<ModelSelection>,
    file: Option<String>,
    correlation_id: Option<String>,
}

impl StreamingRequestBuilder {
    fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            request_type: "general".to_string(),
            session_key: None,
            searching: false,
            models: None,
            file: None,
            correlation_id: None,
        }
    }

    /// Sets the category/type tag (defaults to `general`).
    pub fn request_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = request_type.into();
        self
    }

    pub fn session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    /// Enables supplementary web search.
    pub fn searching(mut self, enabled: bool) -> Self {
        self.searching = enabled;
        self
    }

    /// Selects a single model. Replaces any earlier model selection.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.models = Some(ModelSelection::Single(model.into()));
        self
    }

    /// Selects an agent/model list. Replaces any earlier model selection.
    pub fn agent_models(mut self, agents: Vec<AgentModel>) -> Self {
        self.models = Some(ModelSelection::Agents(agents));
        self
    }

    /// Attaches a base64-encoded file.
    pub fn file_base64(mut self, encoded: impl Into<String>) -> Self {
        self.file = Some(encoded.into());
        self
    }

    /// Attaches raw bytes, encoding them as standard base64.
    pub fn file_bytes(self, bytes: &[u8]) -> Self {
        self.file_base64(STANDARD.encode(bytes))
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Validates the collected fields and produces a request.
    pub fn build(self) -> Result<StreamingRequest, StreamError> {
        if self.question.trim().is_empty() {
            return Err(StreamError::validation("question must not be empty"));
        }
        if self.request_type.trim().is_empty() {
            return Err(StreamError::validation("request type must not be empty"));
        }
        if let Some(key) = &self.session_key
            && key.trim().is_empty()
        {
            return Err(StreamError::validation(
                "session key must not be blank when supplied",
            ));
        }

        let models = self.models.ok_or_else(|| {
            StreamError::validation("missing required fields: a model or agent models")
        })?;
        validate_models(&models)?;

        if let Some(file) = &self.file {
            validate_attachment(file)?;
        }

        let correlation_id = match self.correlation_id {
            Some(id) if id.trim().is_empty() => {
                return Err(StreamError::validation(
                    "correlation id must not be blank when supplied",
                ));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        Ok(StreamingRequest {
            question: self.question,
            request_type: self.request_type,
            session_key: self.session_key,
            searching: self.searching,
            models,
            file: self.file,
            correlation_id,
        })
    }
}

fn validate_models(models: &ModelSelection) -> Result<(), StreamError> {
    match models {
        ModelSelection::Single(model) if model.trim().is_empty() => {
            Err(StreamError::validation("model must not be empty"))
        }
        ModelSelection::Single(_) => Ok(()),
        ModelSelection::Agents(agents) if agents.is_empty() => Err(StreamError::validation(
            "agent models must contain at least one entry",
        )),
        ModelSelection::Agents(agents) => {
            for pair in agents {
                if !ALLOWED_AGENTS.contains(&pair.agent.as_str()) {
                    return Err(StreamError::validation(format!(
                        "unknown agent `{}`",
                        pair.agent
                    )));
                }
                if pair.model.trim().is_empty() {
                    return Err(StreamError::validation(format!(
                        "agent `{}` has an empty model",
                        pair.agent
                    )));
                }
            }
            Ok(())
        }
    }
}

fn validate_attachment(encoded: &str) -> Result<(), StreamError> {
    // Cheap upper bound first so oversized payloads are never decoded.
    if encoded.len() / 4 * 3 > MAX_ATTACHMENT_BYTES + 3 {
        return Err(StreamError::validation("attachment exceeds 10 MiB"));
    }
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|e| StreamError::validation(format!("attachment is not valid base64: {e}")))?;
    if decoded.len() > MAX_ATTACHMENT_BYTES {
        return Err(StreamError::validation("attachment exceeds 10 MiB"));
    }
    Ok(())
}
