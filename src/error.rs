use std::fmt;

use thiserror::Error;

use crate::{config::ConfigError, personas::PromptError};

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),

    #[error("backend client `{0}` has already been closed")]
    ClientClosed(String),
}

/// Everything that can stop the tool before the first conversational turn.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("provider `{0}` is not compiled into this build (enable the `{0}` feature)")]
    MissingDependency(&'static str),

    #[error("failed to initialise backend client: {0}")]
    Provider(#[from] LLMError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that end a conversation run without a result.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("conversation has no participants")]
    NoParticipants,

    #[error("agent `{agent}` failed to produce a turn: {source}")]
    Backend {
        agent: String,
        #[source]
        source: LLMError,
    },

    #[error("failed to render agent guidelines: {0}")]
    Guidelines(#[from] handlebars::RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    MissingResource,
    MissingConfiguration,
    MissingDependency,
    Unexpected,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::MissingResource => "file error",
            ErrorCategory::MissingConfiguration => "configuration error",
            ErrorCategory::MissingDependency => "dependency error",
            ErrorCategory::Unexpected => "unexpected error",
        };
        f.write_str(label)
    }
}

impl SetupError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SetupError::Prompt(PromptError::Empty { .. }) => ErrorCategory::MissingConfiguration,
            SetupError::Prompt(_) => ErrorCategory::MissingResource,
            SetupError::Config(_) => ErrorCategory::MissingConfiguration,
            SetupError::MissingDependency(_) => ErrorCategory::MissingDependency,
            SetupError::Provider(_) | SetupError::Io(_) => ErrorCategory::Unexpected,
        }
    }
}
