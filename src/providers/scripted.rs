use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole},
    LLMError,
};

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    /// A response without any text content.
    Empty,
    Fail(String),
}

/// Replays queued replies in order. Records every request and counts `close`
/// calls so tests can assert on both.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
    closes: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .fold(Self::new(), |provider, text| provider.reply(text))
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(ScriptedReply::Text(text.into()))
    }

    pub fn empty(self) -> Self {
        self.push(ScriptedReply::Empty)
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Fail(message.into()))
    }

    /// Reply used once the queue is drained. Without one, a drained queue fails.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    fn push(self, reply: ScriptedReply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        let next = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .or_else(|| self.fallback.clone().map(ScriptedReply::Text));

        let content = match next {
            Some(ScriptedReply::Text(text)) => Some(text),
            Some(ScriptedReply::Empty) => None,
            Some(ScriptedReply::Fail(message)) => return Err(LLMError::Provider(message)),
            None => return Err(LLMError::Provider("no more scripted responses".to_string())),
        };

        Ok(CompletionResponse {
            message: ChatMessage {
                role: MessageRole::Assistant,
                content,
                name: None,
            },
            usage: None,
        })
    }

    async fn close(&self) -> Result<(), LLMError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_replies_in_order_then_fails() {
        let provider = ScriptedProvider::from_texts(["first", "second"]);
        let request = || CompletionRequest::new("scripted", vec![ChatMessage::user("hi")]);

        let first = provider.complete(request()).await.unwrap();
        let second = provider.complete(request()).await.unwrap();
        assert_eq!(first.message.text(), Some("first"));
        assert_eq!(second.message.text(), Some("second"));
        assert!(provider.complete(request()).await.is_err());
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn falls_back_when_drained() {
        let provider = ScriptedProvider::new().empty().with_fallback("again");
        let request = || CompletionRequest::new("scripted", Vec::new());

        assert_eq!(provider.complete(request()).await.unwrap().message.text(), None);
        assert_eq!(provider.complete(request()).await.unwrap().message.text(), Some("again"));
    }
}
