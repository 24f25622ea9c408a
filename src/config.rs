//! Provider selection and run settings.
//!
//! Provider configuration comes from the environment (optionally seeded from a
//! `.env` file by the binary). Run settings can additionally be read from a
//! YAML file; command-line flags take precedence over both.

use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::ModelCapabilities;

pub const DEFAULT_ANTHROPIC_CUSTOMER_MODEL: &str = "claude-3-haiku-20240307";
pub const DEFAULT_ANTHROPIC_STAFF_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

pub const DEFAULT_SCENARIO: &str = "General customer support conversation";
pub const DEFAULT_INITIAL_MESSAGE: &str = "Hello.";
pub const DEFAULT_MAX_TURNS: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported API_PROVIDER `{0}`: choose `anthropic` or `gemini`")]
    UnsupportedProvider(String),

    #[error("the {0} environment variable is not set")]
    MissingCredential(&'static str),

    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read settings file {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type ConfigResult<T = ProviderConfig> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    fn credential_key(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GOOGLE_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Credentials and model choices for the selected provider family.
#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub customer_model: String,
    /// Also used by the evaluator.
    pub staff_model: String,
    /// Only meaningful for families reached through the OpenAI-compatible shim.
    pub base_url: Option<String>,
    pub model_info: Option<ModelCapabilities>,
    pub request_timeout: Duration,
    pub max_tokens: u32,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("customer_model", &self.customer_model)
            .field("staff_model", &self.staff_model)
            .field("base_url", &self.base_url)
            .field("model_info", &self.model_info)
            .field("request_timeout", &self.request_timeout)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    pub fn from_env() -> ConfigResult {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let kind = match get("API_PROVIDER") {
            Some(value) => value.parse::<ProviderKind>()?,
            None => ProviderKind::Anthropic,
        };

        let api_key = get(kind.credential_key())
            .ok_or(ConfigError::MissingCredential(kind.credential_key()))?;

        let request_timeout = match get("LLM_REQUEST_TIMEOUT_MS") {
            Some(value) => Duration::from_millis(parse_number("LLM_REQUEST_TIMEOUT_MS", &value)?),
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let max_tokens = match get("LLM_MAX_TOKENS") {
            Some(value) => parse_number("LLM_MAX_TOKENS", &value)?,
            None => DEFAULT_MAX_TOKENS,
        };

        let config = match kind {
            ProviderKind::Anthropic => Self {
                kind,
                api_key,
                customer_model: get("ANTHROPIC_CUSTOMER_MODEL")
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_CUSTOMER_MODEL.to_string()),
                staff_model: get("ANTHROPIC_STAFF_MODEL")
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_STAFF_MODEL.to_string()),
                base_url: None,
                model_info: None,
                request_timeout,
                max_tokens,
            },
            ProviderKind::Gemini => Self {
                kind,
                api_key,
                customer_model: get("GEMINI_CUSTOMER_MODEL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                staff_model: get("GEMINI_STAFF_MODEL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: Some(
                    get("GEMINI_API_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
                ),
                model_info: Some(ModelCapabilities::gemini()),
                request_timeout,
                max_tokens,
            },
        };

        info!(
            provider = %config.kind,
            customer_model = %config.customer_model,
            staff_model = %config.staff_model,
            "provider configured"
        );

        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> ConfigResult<T> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

/// Optional inputs for a run, usually loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub scenario: Option<String>,
    pub initial_message: Option<String>,
    pub max_turns: Option<usize>,
    pub prompts_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl RunSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&raw).map_err(|source| ConfigError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns.unwrap_or(DEFAULT_MAX_TURNS)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.prompts_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs"))
    }
}
