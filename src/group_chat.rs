use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::{
    agents::AgentConfig,
    conversation_log::ConversationLog,
    error::RunError,
    normalize::{normalize, TranscriptMessage},
};

pub const TERMINATION_TOKEN: &str = "DONE";

static DONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)DONE").unwrap());

pub trait TerminationCondition: Send + Sync {
    /// Checked after every turn; `true` ends the conversation naturally.
    fn is_met(&self, message: &TranscriptMessage) -> bool;

    fn describe(&self) -> String;
}

/// Ends the chat once an utterance mentions the token, in any letter case.
#[derive(Debug, Clone)]
pub struct TextMentionTermination {
    token: String,
    pattern: Regex,
}

impl TextMentionTermination {
    pub fn new(token: impl Into<String>) -> Result<Self, regex::Error> {
        let token = token.into();
        let pattern = Regex::new(&format!("(?i){}", regex::escape(&token)))?;
        Ok(Self { token, pattern })
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Default for TextMentionTermination {
    fn default() -> Self {
        Self {
            token: TERMINATION_TOKEN.to_string(),
            pattern: DONE_PATTERN.clone(),
        }
    }
}

impl TerminationCondition for TextMentionTermination {
    fn is_met(&self, message: &TranscriptMessage) -> bool {
        self.pattern.is_match(&message.content)
    }

    fn describe(&self) -> String {
        format!("text mention of `{}`", self.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    TokenMentioned { speaker: String },
    TurnBudgetExhausted { budget: usize },
}

#[derive(Debug, Clone)]
pub enum GroupChatEvent {
    Turn { index: usize, message: TranscriptMessage },
    Terminated { reason: TerminationReason },
}

#[derive(Debug, Clone)]
pub struct GroupChatRun {
    pub transcript: Vec<TranscriptMessage>,
    pub ended_naturally: bool,
    pub turns: usize,
    pub reason: TerminationReason,
}

/// Participants speak in strict rotation, starting with the first one, until
/// the termination condition fires or the turn budget is spent.
pub struct RoundRobinGroupChat {
    participants: Vec<AgentConfig>,
    max_turns: usize,
    termination: Box<dyn TerminationCondition>,
    event_callback: Option<Arc<dyn Fn(&GroupChatEvent) + Send + Sync>>,
}

impl RoundRobinGroupChat {
    pub fn new(participants: Vec<AgentConfig>, max_turns: usize) -> Self {
        Self {
            participants,
            max_turns,
            termination: Box::new(TextMentionTermination::default()),
            event_callback: None,
        }
    }

    pub fn with_termination(mut self, termination: impl TerminationCondition + 'static) -> Self {
        self.termination = Box::new(termination);
        self
    }

    pub fn with_event_callback(mut self, callback: impl Fn(&GroupChatEvent) + Send + Sync + 'static) -> Self {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    fn emit_event(&self, event: &GroupChatEvent) {
        if let Some(callback) = &self.event_callback {
            callback(event);
        }
    }

    /// Drives the conversation. `task` opens the shared history every agent
    /// sees but is not part of the returned transcript. Each turn is appended
    /// to `log` before it is emitted.
    pub async fn run(&self, task: TranscriptMessage, log: &mut ConversationLog) -> Result<GroupChatRun, RunError> {
        if self.participants.is_empty() {
            return Err(RunError::NoParticipants);
        }

        let mut history = vec![task];
        let mut transcript = Vec::new();
        let mut reason = TerminationReason::TurnBudgetExhausted {
            budget: self.max_turns,
        };

        info!(
            participants = self.participants.len(),
            max_turns = self.max_turns,
            termination = %self.termination.describe(),
            "group chat started"
        );

        for index in 0..self.max_turns {
            let agent = &self.participants[index % self.participants.len()];
            debug!(turn = index + 1, agent = agent.name(), "requesting turn");

            let raw = agent
                .take_turn(&history)
                .await
                .map_err(|source| RunError::Backend {
                    agent: agent.name().to_string(),
                    source,
                })?;

            let message = normalize(&raw);
            log.append(&message.speaker, &message.content);
            self.emit_event(&GroupChatEvent::Turn {
                index,
                message: message.clone(),
            });

            let finished = self.termination.is_met(&message);
            history.push(message.clone());
            transcript.push(message);

            if finished {
                reason = TerminationReason::TokenMentioned {
                    speaker: agent.name().to_string(),
                };
                break;
            }
        }

        let ended_naturally = matches!(reason, TerminationReason::TokenMentioned { .. });
        info!(turns = transcript.len(), ended_naturally, "group chat finished");
        self.emit_event(&GroupChatEvent::Terminated {
            reason: reason.clone(),
        });

        Ok(GroupChatRun {
            turns: transcript.len(),
            transcript,
            ended_naturally,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        agents::AgentRole,
        backend::BackendClient,
        providers::scripted::ScriptedProvider,
    };

    fn agent(role: AgentRole, provider: ScriptedProvider) -> AgentConfig {
        AgentConfig::new(
            role,
            "persona",
            Arc::new(BackendClient::new(role.name(), Arc::new(provider), "model")),
        )
    }

    fn chat(customer: ScriptedProvider, staff: ScriptedProvider, max_turns: usize) -> RoundRobinGroupChat {
        RoundRobinGroupChat::new(
            vec![agent(AgentRole::Customer, customer), agent(AgentRole::Staff, staff)],
            max_turns,
        )
    }

    fn task() -> TranscriptMessage {
        TranscriptMessage::new("user", "Kettle refund")
    }

    #[test]
    fn token_matches_in_any_case() {
        let termination = TextMentionTermination::default();
        for text in ["Thanks. DONE", "ok done", "Done!", "abandoned"] {
            assert!(termination.is_met(&TranscriptMessage::new("Staff", text)), "{text}");
        }
        assert!(!termination.is_met(&TranscriptMessage::new("Staff", "Not yet")));
    }

    #[test]
    fn custom_token_is_escaped() {
        let termination = TextMentionTermination::new("[end]").unwrap();
        assert_eq!(termination.token(), "[end]");
        assert!(termination.is_met(&TranscriptMessage::new("Staff", "bye [END]")));
        assert!(!termination.is_met(&TranscriptMessage::new("Staff", "e")));
    }

    #[tokio::test]
    async fn alternates_until_budget_is_spent() {
        let customer = ScriptedProvider::new().with_fallback("Another question.");
        let staff = ScriptedProvider::new().with_fallback("Another answer.");
        let mut log = ConversationLog::in_memory();

        let run = chat(customer, staff, 5).run(task(), &mut log).await.unwrap();

        assert_eq!(run.turns, 5);
        assert!(!run.ended_naturally);
        assert_eq!(run.reason, TerminationReason::TurnBudgetExhausted { budget: 5 });
        let speakers: Vec<&str> = run.transcript.iter().map(|m| m.speaker.as_str()).collect();
        assert_eq!(speakers, ["Customer", "Staff", "Customer", "Staff", "Customer"]);
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn stops_on_first_mention_of_token() {
        let customer = ScriptedProvider::from_texts(["My kettle broke.", "Great, thanks! done"]);
        let staff = ScriptedProvider::from_texts(["I can refund it."]);
        let mut log = ConversationLog::in_memory();

        let run = chat(customer, staff, 10).run(task(), &mut log).await.unwrap();

        assert!(run.ended_naturally);
        assert_eq!(run.turns, 3);
        assert_eq!(
            run.reason,
            TerminationReason::TokenMentioned {
                speaker: "Customer".to_string()
            }
        );
        assert_eq!(run.transcript.last().unwrap().content, "Great, thanks! done");
    }

    #[tokio::test]
    async fn custom_termination_token_replaces_done() {
        let customer = ScriptedProvider::from_texts(["I am DONE with this kettle.", "Bye [END]"]);
        let staff = ScriptedProvider::from_texts(["Let me help."]);
        let mut log = ConversationLog::in_memory();

        let run = chat(customer, staff, 10)
            .with_termination(TextMentionTermination::new("[end]").unwrap())
            .run(task(), &mut log)
            .await
            .unwrap();

        assert!(run.ended_naturally);
        assert_eq!(run.turns, 3);
        assert_eq!(run.transcript.last().unwrap().content, "Bye [END]");
    }

    #[tokio::test]
    async fn zero_budget_produces_no_turns() {
        let customer = ScriptedProvider::from_texts(["unused"]);
        let mut log = ConversationLog::in_memory();

        let run = chat(customer, ScriptedProvider::new(), 0)
            .run(task(), &mut log)
            .await
            .unwrap();

        assert_eq!(run.turns, 0);
        assert!(run.transcript.is_empty());
        assert!(!run.ended_naturally);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_propagates_after_logging_earlier_turns() {
        let customer = ScriptedProvider::from_texts(["Hello?"]);
        let staff = ScriptedProvider::new().fail("quota exceeded");
        let mut log = ConversationLog::in_memory();

        let error = chat(customer, staff, 4).run(task(), &mut log).await.unwrap_err();

        assert!(matches!(error, RunError::Backend { ref agent, .. } if agent == "Staff"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].speaker, "Customer");
    }

    #[tokio::test]
    async fn task_opens_history_but_not_transcript() {
        let customer = Arc::new(ScriptedProvider::from_texts(["Hi"]));
        let participant = AgentConfig::new(
            AgentRole::Customer,
            "persona",
            Arc::new(BackendClient::new("customer", customer.clone(), "model")),
        );
        let mut log = ConversationLog::in_memory();

        let run = RoundRobinGroupChat::new(vec![participant], 1)
            .run(task(), &mut log)
            .await
            .unwrap();

        assert_eq!(run.transcript, vec![TranscriptMessage::new("Customer", "Hi")]);
        let requests = customer.requests();
        assert_eq!(requests[0].messages[1].text(), Some("Kettle refund"));
    }

    #[tokio::test]
    async fn emits_turns_then_termination() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut log = ConversationLog::in_memory();

        chat(
            ScriptedProvider::from_texts(["Hi"]),
            ScriptedProvider::from_texts(["Bye DONE"]),
            6,
        )
        .with_event_callback(move |event| sink.lock().unwrap().push(event.clone()))
        .run(task(), &mut log)
        .await
        .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], GroupChatEvent::Turn { index: 0, message } if message.speaker == "Customer"));
        assert!(matches!(&events[1], GroupChatEvent::Turn { index: 1, message } if message.speaker == "Staff"));
        assert!(matches!(
            &events[2],
            GroupChatEvent::Terminated {
                reason: TerminationReason::TokenMentioned { .. }
            }
        ));
    }

    #[tokio::test]
    async fn empty_roster_is_rejected() {
        let mut log = ConversationLog::in_memory();
        let error = RoundRobinGroupChat::new(Vec::new(), 3)
            .run(task(), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(error, RunError::NoParticipants));
    }
}
