pub mod agents;
pub mod backend;
pub mod config;
pub mod conversation_log;
pub mod error;
pub mod evaluator;
pub mod group_chat;
pub mod normalize;
pub mod personas;
pub mod providers;
pub mod session;
pub mod types;

pub use agents::{render_guidelines, AgentConfig, AgentRole, AgentRoster};
pub use backend::{BackendClient, BackendPair};
pub use config::{ConfigError, ProviderConfig, ProviderKind, RunSettings};
pub use conversation_log::{format_duration, ConversationLog, ConversationStats, LogEntry, LogError};
pub use error::{ErrorCategory, LLMError, RunError, SetupError};
pub use evaluator::{EvaluatorDriver, EVALUATION_FAILURE};
pub use group_chat::{
    GroupChatEvent,
    GroupChatRun,
    RoundRobinGroupChat,
    TerminationCondition,
    TerminationReason,
    TextMentionTermination,
    TERMINATION_TOKEN,
};
pub use normalize::{normalize, MessageObject, RawTurn, Sender, TranscriptMessage};
pub use personas::{PersonaBundle, PromptError};
pub use providers::LLMProvider;
pub use session::{task_message, ConversationRunResult, ConversationSession, RunContext};
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, MessageRole, ModelCapabilities,
    ProviderCapabilities, TokenUsage,
};
