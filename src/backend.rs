use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::{debug, error, info};

use crate::{
    config::{ProviderConfig, ProviderKind},
    error::SetupError,
    normalize::TranscriptMessage,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMError, LLMProvider,
};

/// One completion endpoint bound to one model.
///
/// Closing is idempotent: the underlying provider is released on the first
/// call only, so every exit path of a run may call [`BackendClient::close`].
pub struct BackendClient {
    label: String,
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_tokens: Option<u32>,
    closed: AtomicBool,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("label", &self.label)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BackendClient {
    pub fn new(
        label: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            provider,
            model: model.into(),
            max_tokens: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends one completion request. `history` entries spoken by `speaker`
    /// become assistant messages, everything else is presented as user input.
    pub async fn complete(
        &self,
        system_instruction: &str,
        history: &[TranscriptMessage],
        speaker: &str,
    ) -> Result<CompletionResponse, LLMError> {
        if self.is_closed() {
            return Err(LLMError::ClientClosed(self.label.clone()));
        }

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_instruction));
        messages.extend(history.iter().map(|entry| {
            if entry.speaker == speaker {
                ChatMessage::assistant(entry.content.clone())
            } else {
                ChatMessage::user(entry.content.clone())
            }
        }));

        let mut request = CompletionRequest::new(self.model.clone(), messages);
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        debug!(backend = %self.label, model = %self.model, speaker, "requesting completion");
        self.provider.complete(request).await
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(backend = %self.label, "backend client already closed");
            return;
        }

        match self.provider.close().await {
            Ok(()) => info!(backend = %self.label, "backend client closed"),
            Err(err) => error!(backend = %self.label, error = %err, "failed to close backend client"),
        }
    }
}

/// The customer-voice and staff-voice clients of one run. The staff client
/// also serves the evaluator.
#[derive(Debug, Clone)]
pub struct BackendPair {
    pub customer: Arc<BackendClient>,
    pub staff: Arc<BackendClient>,
}

impl BackendPair {
    pub fn new(customer: BackendClient, staff: BackendClient) -> Self {
        Self {
            customer: Arc::new(customer),
            staff: Arc::new(staff),
        }
    }

    /// Connects both clients for the configured provider family.
    pub fn connect(config: &ProviderConfig) -> Result<Self, SetupError> {
        let customer = BackendClient::new("customer", build_provider(config)?, &config.customer_model)
            .with_max_tokens(config.max_tokens);
        let staff = BackendClient::new("staff", build_provider(config)?, &config.staff_model)
            .with_max_tokens(config.max_tokens);

        info!(
            provider = %config.kind,
            customer_model = %config.customer_model,
            staff_model = %config.staff_model,
            "backend clients ready"
        );

        Ok(Self::new(customer, staff))
    }

    pub async fn close(&self) {
        self.customer.close().await;
        self.staff.close().await;
    }
}

fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LLMProvider>, SetupError> {
    match config.kind {
        ProviderKind::Anthropic => anthropic_provider(config),
        ProviderKind::Gemini => gemini_provider(config),
    }
}

#[cfg(feature = "anthropic")]
fn anthropic_provider(config: &ProviderConfig) -> Result<Arc<dyn LLMProvider>, SetupError> {
    use crate::providers::anthropic::{Anthropic, AnthropicConfig};

    let provider = Anthropic::from_config(
        AnthropicConfig::new(config.api_key.clone())
            .with_max_tokens(config.max_tokens)
            .with_timeout(config.request_timeout),
    )?;
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "anthropic"))]
fn anthropic_provider(_config: &ProviderConfig) -> Result<Arc<dyn LLMProvider>, SetupError> {
    Err(SetupError::MissingDependency("anthropic"))
}

#[cfg(feature = "gemini")]
fn gemini_provider(config: &ProviderConfig) -> Result<Arc<dyn LLMProvider>, SetupError> {
    use crate::providers::openai::{OpenAICompatible, OpenAICompatibleConfig};

    let mut shim = OpenAICompatibleConfig::gemini(config.api_key.clone())
        .with_timeout(config.request_timeout);
    if let Some(base_url) = &config.base_url {
        shim = shim.with_base_url(base_url.clone());
    }
    if let Some(model_info) = &config.model_info {
        shim = shim.with_model_info(model_info.clone());
    }

    let provider = OpenAICompatible::from_config(shim)?;
    info!(base_url = provider.base_url(), family = %provider.model_info().family, "using OpenAI-compatible shim");
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "gemini"))]
fn gemini_provider(_config: &ProviderConfig) -> Result<Arc<dyn LLMProvider>, SetupError> {
    Err(SetupError::MissingDependency("gemini"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{providers::scripted::ScriptedProvider, types::MessageRole};

    #[tokio::test]
    async fn maps_own_turns_to_assistant_role() {
        let provider = Arc::new(ScriptedProvider::from_texts(["ok"]));
        let client = BackendClient::new("staff", provider.clone(), "model");
        let history = vec![
            TranscriptMessage::new("user", "Scenario"),
            TranscriptMessage::new("Customer", "Hi"),
            TranscriptMessage::new("Staff", "Welcome"),
        ];

        client.complete("You are staff.", &history, "Staff").await.unwrap();

        let requests = provider.requests();
        let request = &requests[0];
        let roles: Vec<MessageRole> = request.messages.iter().map(|m| m.role.clone()).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::User,
                MessageRole::Assistant
            ]
        );
        assert_eq!(request.messages[0].text(), Some("You are staff."));
    }

    #[tokio::test]
    async fn close_releases_provider_once() {
        let provider = Arc::new(ScriptedProvider::new());
        let client = BackendClient::new("customer", provider.clone(), "model");

        client.close().await;
        client.close().await;

        assert!(client.is_closed());
        assert_eq!(provider.close_count(), 1);
    }

    #[tokio::test]
    async fn closed_client_refuses_requests() {
        let provider = Arc::new(ScriptedProvider::from_texts(["unused"]));
        let client = BackendClient::new("customer", provider.clone(), "model");
        client.close().await;

        let error = client.complete("system", &[], "Customer").await.unwrap_err();
        assert!(matches!(error, LLMError::ClientClosed(label) if label == "customer"));
        assert_eq!(provider.request_count(), 0);
    }
}
