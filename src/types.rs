use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, value: u32) -> Self {
        self.max_tokens = Some(value);
        self
    }

    pub fn with_temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    /// Text of the leading system messages, joined in order.
    pub fn system_instruction(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::System)
            .filter_map(|message| message.text())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
}

/// Feature flags a model advertises when reached through a compatibility shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub family: String,
    pub vision: bool,
    pub function_calling: bool,
    pub json_output: bool,
}

impl ModelCapabilities {
    pub fn gemini() -> Self {
        Self {
            family: "gemini".to_string(),
            vision: true,
            function_calling: true,
            json_output: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub supports_vision: bool,
    pub supports_function_calling: bool,
    pub supports_json_output: bool,
}

impl ProviderCapabilities {
    pub const fn new(
        supports_vision: bool,
        supports_function_calling: bool,
        supports_json_output: bool,
    ) -> Self {
        Self {
            supports_vision,
            supports_function_calling,
            supports_json_output,
        }
    }
}

impl From<&ModelCapabilities> for ProviderCapabilities {
    fn from(value: &ModelCapabilities) -> Self {
        Self::new(value.vision, value.function_calling, value.json_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_system_instruction() {
        let request = CompletionRequest::new(
            "model",
            vec![
                ChatMessage::system("persona"),
                ChatMessage::system("guidelines"),
                ChatMessage::user("hi"),
            ],
        );

        assert_eq!(request.system_instruction().as_deref(), Some("persona\n\nguidelines"));
    }

    #[test]
    fn omits_empty_fields_when_serialized() {
        let value = serde_json::to_value(ChatMessage::user("hello")).unwrap();
        assert_eq!(value, serde_json::json!({ "role": "user", "content": "hello" }));
    }
}
