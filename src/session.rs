use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    agents::AgentRoster,
    backend::BackendPair,
    conversation_log::{ConversationLog, ConversationStats},
    error::RunError,
    evaluator::EvaluatorDriver,
    group_chat::{GroupChatEvent, RoundRobinGroupChat, TerminationReason},
    normalize::TranscriptMessage,
    personas::PersonaBundle,
};

pub const SYSTEM_SPEAKER: &str = "System";
pub const EVALUATOR_SPEAKER: &str = "Evaluator";

/// Where one run writes its files. Both names share the run's start stamp.
#[derive(Debug)]
pub struct RunContext {
    stamp: String,
    log_dir: Option<PathBuf>,
    log: ConversationLog,
}

impl RunContext {
    /// Creates `log_dir` if needed and binds the conversation log to
    /// `chat_<stamp>.json` inside it.
    pub fn create(log_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let log = ConversationLog::with_file(log_dir.join(format!("chat_{stamp}.json")));

        Ok(Self {
            stamp,
            log_dir: Some(log_dir),
            log,
        })
    }

    /// No files at all; used by tests and embedders that keep the log.
    pub fn in_memory() -> Self {
        Self {
            stamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            log_dir: None,
            log: ConversationLog::in_memory(),
        }
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    pub fn conversation_log_file(&self) -> Option<&Path> {
        self.log.path()
    }

    /// Target for the diagnostic log sink, `conversation_<stamp>.log`.
    pub fn system_log_file(&self) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("conversation_{}.log", self.stamp)))
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationRunResult {
    pub transcript: Vec<TranscriptMessage>,
    pub evaluation: String,
    pub ended_naturally: bool,
    pub total_turns: usize,
    pub log_file_json: Option<PathBuf>,
    pub log_file_system: Option<PathBuf>,
}

/// The opening message every agent sees before the first turn.
pub fn task_message(scenario: &str, initial_message: Option<&str>) -> TranscriptMessage {
    let content = match initial_message.map(str::trim).filter(|text| !text.is_empty()) {
        Some(opening) => format!(
            "{scenario}\n\nThe customer opens the conversation by saying: \"{opening}\""
        ),
        None => scenario.to_string(),
    };
    TranscriptMessage::new("user", content)
}

pub struct ConversationSession {
    context: RunContext,
    personas: PersonaBundle,
    backends: BackendPair,
    observer: Option<Arc<dyn Fn(&GroupChatEvent) + Send + Sync>>,
}

impl ConversationSession {
    pub fn new(context: RunContext, personas: PersonaBundle, backends: BackendPair) -> Self {
        Self {
            context,
            personas,
            backends,
            observer: None,
        }
    }

    /// Receives every turn as soon as it has been logged.
    pub fn with_observer(mut self, observer: impl Fn(&GroupChatEvent) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn log(&self) -> &ConversationLog {
        self.context.log()
    }

    pub fn stats(&self) -> Option<ConversationStats> {
        self.context.log.stats()
    }

    pub async fn run(&mut self, scenario: &str, turn_budget: usize) -> Result<ConversationRunResult, RunError> {
        self.run_with_opening(scenario, None, turn_budget).await
    }

    /// Runs one conversation and its evaluation. Both backends are released
    /// before this returns, whatever the outcome.
    pub async fn run_with_opening(
        &mut self,
        scenario: &str,
        initial_message: Option<&str>,
        turn_budget: usize,
    ) -> Result<ConversationRunResult, RunError> {
        info!(scenario, turn_budget, "conversation run started");
        self.context
            .log
            .append(SYSTEM_SPEAKER, &format!("Scenario: {scenario}"));

        let outcome = self.drive(scenario, initial_message, turn_budget).await;
        self.release().await;

        match &outcome {
            Ok(result) => info!(
                total_turns = result.total_turns,
                ended_naturally = result.ended_naturally,
                "conversation run finished"
            ),
            Err(err) => error!(error = %err, "conversation run failed"),
        }
        outcome
    }

    async fn drive(
        &mut self,
        scenario: &str,
        initial_message: Option<&str>,
        turn_budget: usize,
    ) -> Result<ConversationRunResult, RunError> {
        let roster = AgentRoster::build(&self.personas, scenario, turn_budget, &self.backends)?;

        let mut chat = RoundRobinGroupChat::new(vec![roster.customer, roster.staff], turn_budget);
        if let Some(observer) = &self.observer {
            let observer = Arc::clone(observer);
            chat = chat.with_event_callback(move |event| observer(event));
        }

        let run = chat
            .run(task_message(scenario, initial_message), &mut self.context.log)
            .await?;

        match &run.reason {
            TerminationReason::TokenMentioned { speaker } => {
                info!(speaker = %speaker, turns = run.turns, "conversation ended by termination token")
            }
            TerminationReason::TurnBudgetExhausted { budget } => {
                warn!(budget, "conversation reached the turn budget without ending")
            }
        }

        let evaluation = EvaluatorDriver::new(roster.evaluator)
            .evaluate(&run.transcript)
            .await;
        self.context.log.append(EVALUATOR_SPEAKER, &evaluation);

        Ok(ConversationRunResult {
            transcript: run.transcript,
            evaluation,
            ended_naturally: run.ended_naturally,
            total_turns: run.turns,
            log_file_json: self.context.conversation_log_file().map(Path::to_path_buf),
            log_file_system: self.context.system_log_file(),
        })
    }

    /// Closes both backend clients. Safe to call any number of times.
    pub async fn release(&self) {
        self.backends.close().await;
    }
}
