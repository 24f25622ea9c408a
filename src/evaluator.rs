use tracing::{error, info, warn};

use crate::{
    agents::AgentConfig,
    normalize::TranscriptMessage,
};

/// Returned in place of a verdict whenever the evaluator cannot produce one.
pub const EVALUATION_FAILURE: &str = "Evaluation error: the evaluator agent returned no response.";

/// Renders the transcript as `[speaker]: content` lines inside the request
/// handed to the evaluator.
pub fn render_request(transcript: &[TranscriptMessage]) -> String {
    let lines = transcript
        .iter()
        .map(|message| format!("[{}]: {}", message.speaker, message.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Evaluate the following conversation as a whole.\n\n\
         ### Conversation log\n\
         {lines}\n\n\
         Follow your evaluation criteria and give your verdict."
    )
}

pub struct EvaluatorDriver {
    agent: AgentConfig,
}

impl EvaluatorDriver {
    pub fn new(agent: AgentConfig) -> Self {
        Self { agent }
    }

    /// Sends one evaluation request. Never fails: backend errors and empty
    /// replies both yield [`EVALUATION_FAILURE`].
    pub async fn evaluate(&self, transcript: &[TranscriptMessage]) -> String {
        info!(messages = transcript.len(), "requesting evaluation");
        let request = TranscriptMessage::new("user", render_request(transcript));

        match self.agent.respond(&[request]).await {
            Ok(message) => match message.text().map(str::trim).filter(|text| !text.is_empty()) {
                Some(verdict) => verdict.to_string(),
                None => {
                    warn!(agent = self.agent.name(), "evaluator returned an empty reply");
                    EVALUATION_FAILURE.to_string()
                }
            },
            Err(err) => {
                error!(agent = self.agent.name(), error = %err, "evaluation request failed");
                EVALUATION_FAILURE.to_string()
            }
        }
    }
}
