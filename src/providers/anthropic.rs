use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::LLMError,
    providers::LLMProvider,
    types::{
        ChatMessage, CompletionRequest, CompletionResponse, MessageRole, ProviderCapabilities,
        TokenUsage,
    },
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Anthropic {
    client: Client,
    config: AnthropicConfig,
}

impl Anthropic {
    pub fn from_config(config: AnthropicConfig) -> Result<Self, LLMError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequestBody {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorEnvelope {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}

impl MessagesRequestBody {
    fn build(request: CompletionRequest, default_max_tokens: u32) -> Self {
        let system = request.system_instruction();
        let CompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
        } = request;

        Self {
            model,
            max_tokens: max_tokens.unwrap_or(default_max_tokens),
            system,
            messages: alternate_turns(messages),
            temperature,
        }
    }
}

/// The Messages API wants strictly alternating turns that open with `user`.
/// Consecutive same-role messages are merged and an opening placeholder is
/// inserted when the history starts with the assistant.
fn alternate_turns(messages: Vec<ChatMessage>) -> Vec<AnthropicMessage> {
    let mut turns: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        let role = match message.role {
            MessageRole::System => continue,
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        let Some(content) = message.content.filter(|text| !text.trim().is_empty()) else {
            continue;
        };

        match turns.last_mut() {
            Some(previous) if previous.role == role => {
                previous.content.push_str("\n\n");
                previous.content.push_str(&content);
            }
            _ => turns.push(AnthropicMessage { role, content }),
        }
    }

    if turns.first().map_or(true, |turn| turn.role != "user") {
        turns.insert(
            0,
            AnthropicMessage {
                role: "user",
                content: "Please begin.".to_string(),
            },
        );
    }

    turns
}

#[async_trait]
impl LLMProvider for Anthropic {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let body = MessagesRequestBody::build(request, self.config.max_tokens);
        debug!(model = %body.model, messages = body.messages.len(), "sending messages request");

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("messages")))
            .json(&body);

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<AnthropicErrorEnvelope>(&text) {
                return Err(LLMError::Provider(error.error.message));
            }

            return Err(LLMError::Provider(format!("unexpected status {status}: {text}")));
        }

        let parsed: MessagesResponse = response.json().await?;
        let text: Vec<String> = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        let content = if text.is_empty() { None } else { Some(text.join("")) };

        Ok(CompletionResponse {
            message: ChatMessage {
                role: MessageRole::Assistant,
                content,
                name: None,
            },
            usage: parsed.usage.map(|usage| TokenUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
            }),
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::new(true, true, false)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_system_prompt_out_of_messages() {
        let request = CompletionRequest::new(
            "claude",
            vec![ChatMessage::system("You are staff."), ChatMessage::user("Hello")],
        );

        let body = MessagesRequestBody::build(request, 512);
        assert_eq!(body.system.as_deref(), Some("You are staff."));
        assert_eq!(body.max_tokens, 512);
        assert_eq!(
            body.messages,
            vec![AnthropicMessage { role: "user", content: "Hello".to_string() }]
        );
    }

    #[test]
    fn merges_consecutive_turns_of_the_same_role() {
        let turns = alternate_turns(vec![
            ChatMessage::user("Scenario"),
            ChatMessage::user("Hi, I need help."),
            ChatMessage::assistant("Sure."),
        ]);

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "Scenario\n\nHi, I need help.");
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn opens_with_user_turn() {
        let turns = alternate_turns(vec![ChatMessage::assistant("Welcome!")]);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].content, "Welcome!");
    }

    #[test]
    fn parses_text_blocks_and_usage() {
        let payload = r#"{
            "content": [{"type": "text", "text": "Thanks. "}, {"type": "text", "text": "DONE"}],
            "usage": {"input_tokens": 10, "output_tokens": 3}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert_eq!(parsed.usage.unwrap().output_tokens, 3);
    }
}
