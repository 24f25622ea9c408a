//! OpenAI-compatible chat completions client.
//!
//! Used for provider families that expose the OpenAI wire format behind their
//! own endpoint (Gemini's `v1beta/openai` shim). The target model's feature set
//! cannot be discovered through the shim, so it is supplied as
//! [`ModelCapabilities`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::DEFAULT_GEMINI_BASE_URL,
    error::LLMError,
    providers::LLMProvider,
    types::{
        ChatMessage, CompletionRequest, CompletionResponse, ModelCapabilities,
        ProviderCapabilities, TokenUsage,
    },
};

#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_info: ModelCapabilities,
    pub request_timeout: Duration,
}

impl OpenAICompatibleConfig {
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model_info: ModelCapabilities::gemini(),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model_info(mut self, model_info: ModelCapabilities) -> Self {
        self.model_info = model_info;
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OpenAICompatible {
    client: Client,
    config: OpenAICompatibleConfig,
}

impl OpenAICompatible {
    pub fn from_config(config: OpenAICompatibleConfig) -> Result<Self, LLMError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn model_info(&self) -> &ModelCapabilities {
        &self.config.model_info
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl From<CompletionRequest> for ChatRequestBody {
    fn from(request: CompletionRequest) -> Self {
        let CompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
        } = request;

        // The shim rejects per-message `name` fields for some models.
        let messages = messages
            .into_iter()
            .map(|mut message| {
                message.name = None;
                message
            })
            .collect();

        Self {
            model,
            messages,
            max_tokens,
            temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// Gemini's shim answers errors with a top-level array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Single(ErrorEnvelope),
    Many(Vec<ErrorEnvelope>),
}

impl ErrorPayload {
    fn into_message(self) -> Option<String> {
        match self {
            ErrorPayload::Single(envelope) => Some(envelope.error.message),
            ErrorPayload::Many(envelopes) => envelopes.into_iter().next().map(|e| e.error.message),
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatible {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let body = ChatRequestBody::from(request);
        debug!(model = %body.model, messages = body.messages.len(), "sending chat completion");

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("chat/completions")))
            .json(&body);

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Some(message) = serde_json::from_str::<ErrorPayload>(&text)
                .ok()
                .and_then(ErrorPayload::into_message)
            {
                return Err(LLMError::Provider(message));
            }

            return Err(LLMError::Provider(format!("unexpected status {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LLMError::InvalidResponse("response did not contain any choices"))?;

        Ok(CompletionResponse {
            message: choice.message,
            usage: parsed.usage,
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::from(&self.config.model_info)
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}
