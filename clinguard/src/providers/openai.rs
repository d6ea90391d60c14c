//! `OpenAI`-compatible chat completions adapter.
//!
//! Works against the official API and any server speaking the same
//! `/chat/completions` protocol (local proxies, vLLM, Ollama's `/v1`).
//!
//! Persona prompt, domain context and any corrective directive are sent as
//! system messages; the transcript becomes alternating user/assistant
//! messages. The directive is added to the outgoing payload only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::model::{GenerateRequest, ModelCollaborator};
use crate::transcript::Speaker;

/// Default `OpenAI` API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat completions client implementing [`ModelCollaborator`].
#[derive(Clone)]
pub struct OpenAIChatModel {
    http_client: reqwest::Client,
    api_key: Option<Arc<str>>,
    base_url: Arc<str>,
    model: Arc<str>,
    temperature: f32,
}

impl std::fmt::Debug for OpenAIChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIChatModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl OpenAIChatModel {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> OpenAIChatModelBuilder {
        OpenAIChatModelBuilder::default()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(2);
        if let Some(key) = &self.api_key
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}"))
        {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn build_body<'r>(&'r self, request: &'r GenerateRequest<'_>) -> ChatRequest<'r> {
        let mut messages = Vec::with_capacity(request.transcript.len() + 3);
        messages.push(ChatMessage::new("system", request.persona_prompt));
        messages.push(ChatMessage::new("system", request.domain_context));
        for turn in request.transcript {
            let role = match turn.speaker {
                Speaker::User => "user",
                Speaker::Persona => "assistant",
            };
            messages.push(ChatMessage::new(role, &turn.text));
        }
        if let Some(directive) = &request.directive {
            messages.push(ChatMessage::new("system", directive.text()));
        }
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ModelCollaborator for OpenAIChatModel {
    async fn generate(&self, request: GenerateRequest<'_>) -> ModelResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_body(&request);
        debug!(model = %self.model, messages = body.messages.len(), "sending chat request");

        let response = self
            .http_client
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::transport(format!("HTTP {}: {text}", status.as_u16())));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_owned())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ModelError::response("no content in chat completion"))
    }
}

/// Builder for [`OpenAIChatModel`].
#[derive(Debug, Default)]
pub struct OpenAIChatModelBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout: Option<Duration>,
}

impl OpenAIChatModelBuilder {
    /// Set the API key. Optional for local servers.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set a custom base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the HTTP request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Transport`] if the HTTP client cannot be built.
    pub fn build(self) -> ModelResult<OpenAIChatModel> {
        let mut http = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }
        let http_client = http.build()?;

        Ok(OpenAIChatModel {
            http_client,
            api_key: self.api_key.filter(|k| !k.is_empty()).map(Into::into),
            base_url: self.base_url.unwrap_or_else(|| OPENAI_API_BASE_URL.to_owned()).into(),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_owned()).into(),
            temperature: self.temperature.unwrap_or(0.7),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> ChatMessage<'a> {
    const fn new(role: &'static str, content: &'a str) -> Self {
        Self { role, content }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
