use std::{fmt, sync::Arc};

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::{
    backend::{BackendClient, BackendPair},
    group_chat::TERMINATION_TOKEN,
    normalize::{RawTurn, TranscriptMessage},
    personas::PersonaBundle,
    types::ChatMessage,
    LLMError,
};

const GUIDELINES_TEMPLATE: &str = r#"
### Conversation guidelines
- Keep each utterance short (about 2-4 sentences).
- Keep the conversation flowing naturally.
- Do not repeat what has already been said.
- This is a roleplay. Do not talk about training or debriefing.
- Aim to achieve the purpose of the conversation within about {{max_exchanges}} exchanges.

### Ending the conversation
- Once the purpose of the conversation has been achieved and there is nothing left to say, you must end your utterance with the word "{{token}}".
- Example: "Thank you very much, that solves it. {{token}}"
- Do not output any text after "{{token}}".
- Do not output "{{token}}" while questions or answers are still pending, or when you should wait for the other party to reply.

### Current scenario
{{scenario}}

### Important notes
- Stay fully in the persona you have been given.
- If the other party's last utterance already ended the conversation, still include "{{token}}" in your own reply (for example, when they say "Thank you. {{token}}", answer "Thank you as well. {{token}}"). You do not have to repeat "{{token}}" if it would sound unnatural.
- Avoid meta remarks such as thanking the other party for the exercise.
"#;

static TEMPLATES: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string("guidelines", GUIDELINES_TEMPLATE)
        .unwrap();
    registry
});

#[derive(Debug, Serialize)]
struct GuidelineContext<'a> {
    scenario: &'a str,
    max_exchanges: usize,
    token: &'a str,
}

/// Renders the instruction block shared by the customer and the staff agent.
pub fn render_guidelines(scenario: &str, turn_budget: usize) -> Result<String, handlebars::RenderError> {
    TEMPLATES.render(
        "guidelines",
        &GuidelineContext {
            scenario,
            max_exchanges: turn_budget / 2,
            token: TERMINATION_TOKEN,
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Customer,
    Staff,
    Evaluator,
}

impl AgentRole {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Customer => "Customer",
            AgentRole::Staff => "Staff",
            AgentRole::Evaluator => "Evaluator",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub struct AgentConfig {
    role: AgentRole,
    instructions: String,
    backend: Arc<BackendClient>,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("role", &self.role)
            .field("backend", &self.backend.label())
            .field("instructions_len", &self.instructions.len())
            .finish()
    }
}

impl AgentConfig {
    pub fn new(role: AgentRole, instructions: impl Into<String>, backend: Arc<BackendClient>) -> Self {
        Self {
            role,
            instructions: instructions.into(),
            backend,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn name(&self) -> &'static str {
        self.role.name()
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    /// Asks the bound backend for this agent's next utterance.
    pub async fn respond(&self, history: &[TranscriptMessage]) -> Result<ChatMessage, LLMError> {
        let response = self
            .backend
            .complete(&self.instructions, history, self.name())
            .await?;
        Ok(response.message)
    }

    /// Like [`AgentConfig::respond`], attributed to this agent as a raw turn.
    pub async fn take_turn(&self, history: &[TranscriptMessage]) -> Result<RawTurn, LLMError> {
        let message = self.respond(history).await?;
        Ok(RawTurn::from_completion(self.name(), &message))
    }
}

/// The three agents of one conversation run.
#[derive(Debug, Clone)]
pub struct AgentRoster {
    pub customer: AgentConfig,
    pub staff: AgentConfig,
    pub evaluator: AgentConfig,
}

impl AgentRoster {
    pub fn build(
        personas: &PersonaBundle,
        scenario: &str,
        turn_budget: usize,
        backends: &BackendPair,
    ) -> Result<Self, handlebars::RenderError> {
        let guidelines = render_guidelines(scenario, turn_budget)?;

        Ok(Self {
            customer: AgentConfig::new(
                AgentRole::Customer,
                format!("{}\n{}", personas.customer(), guidelines),
                Arc::clone(&backends.customer),
            ),
            staff: AgentConfig::new(
                AgentRole::Staff,
                format!("{}\n{}", personas.staff(), guidelines),
                Arc::clone(&backends.staff),
            ),
            evaluator: AgentConfig::new(
                AgentRole::Evaluator,
                personas.evaluator(),
                Arc::clone(&backends.staff),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::ScriptedProvider;

    fn backends() -> BackendPair {
        BackendPair::new(
            BackendClient::new("customer", Arc::new(ScriptedProvider::new()), "c-model"),
            BackendClient::new("staff", Arc::new(ScriptedProvider::new()), "s-model"),
        )
    }

    #[test]
    fn guidelines_embed_scenario_and_soft_target() {
        let text = render_guidelines("Returning a <broken> kettle & lid", 10).unwrap();
        assert!(text.contains("Returning a <broken> kettle & lid"));
        assert!(text.contains("within about 5 exchanges"));
        assert!(text.contains("\"DONE\""));
    }

    #[test]
    fn roster_composes_instructions_per_role() {
        let personas = PersonaBundle::new("I am a shopper.", "I am a clerk.", "Grade it.").unwrap();
        let roster = AgentRoster::build(&personas, "Kettle refund", 8, &backends()).unwrap();

        assert!(roster.customer.instructions().starts_with("I am a shopper.\n"));
        assert!(roster.customer.instructions().contains("Kettle refund"));
        assert!(roster.staff.instructions().starts_with("I am a clerk.\n"));
        assert_eq!(roster.evaluator.instructions(), "Grade it.");
        assert_eq!(roster.evaluator.backend().label(), "staff");
        assert_eq!(roster.customer.backend().model(), "c-model");
    }

    #[tokio::test]
    async fn turn_is_attributed_to_role_name() {
        let provider = Arc::new(ScriptedProvider::from_texts(["Hello, I need help."]));
        let agent = AgentConfig::new(
            AgentRole::Customer,
            "persona",
            Arc::new(BackendClient::new("customer", provider, "model")),
        );

        let raw = agent.take_turn(&[TranscriptMessage::new("user", "Scenario")]).await.unwrap();
        let message = crate::normalize::normalize(&raw);
        assert_eq!(message, TranscriptMessage::new("Customer", "Hello, I need help."));
    }
}
