//! Canonicalization of raw turn records.
//!
//! Backends do not agree on the shape of a message: some hand back plain JSON
//! mappings, some structured objects, and some only a value that can be
//! printed. [`normalize`] accepts all of them and always produces a
//! [`TranscriptMessage`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::types::ChatMessage;

pub const UNKNOWN_SPEAKER: &str = "Unknown";
pub const CLI_INPUT_SPEAKER: &str = "User_CLI_Input";
pub const CUSTOMER_SPEAKER: &str = "Customer";

/// Canonical `{speaker, content}` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    #[serde(rename = "source", alias = "speaker")]
    pub speaker: String,
    pub content: String,
}

impl TranscriptMessage {
    pub fn new(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Attribute-style message with every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
}

/// One utterance as a backend produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTurn {
    Mapping(Map<String, Value>),
    Object(MessageObject),
    Opaque(Value),
}

impl RawTurn {
    /// JSON objects become mappings, anything else stays opaque.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => RawTurn::Mapping(map),
            other => RawTurn::Opaque(other),
        }
    }

    /// Wraps a completion message produced on behalf of `agent`.
    pub fn from_completion(agent: &str, message: &ChatMessage) -> Self {
        RawTurn::Object(MessageObject {
            content: message.content.clone().map(Value::String),
            name: message.name.clone(),
            source: Some(agent.to_string()),
            role: Some(message.role.as_str().to_string()),
            sender: None,
        })
    }

    fn text_field(&self, key: &str) -> Option<&str> {
        let value = match self {
            RawTurn::Mapping(map) => map.get(key).and_then(Value::as_str),
            RawTurn::Object(object) => match key {
                "name" => object.name.as_deref(),
                "source" => object.source.as_deref(),
                "role" => object.role.as_deref(),
                _ => None,
            },
            RawTurn::Opaque(_) => None,
        };

        value.filter(|text| !text.is_empty())
    }

    fn sender_name(&self) -> Option<&str> {
        let value = match self {
            RawTurn::Mapping(map) => map
                .get("sender")
                .and_then(|sender| sender.get("name"))
                .and_then(Value::as_str),
            RawTurn::Object(object) => object.sender.as_ref().and_then(|s| s.name.as_deref()),
            RawTurn::Opaque(_) => None,
        };

        value.filter(|text| !text.is_empty())
    }

    fn textual_representation(&self) -> String {
        match self {
            RawTurn::Mapping(map) => Value::Object(map.clone()).to_string(),
            RawTurn::Object(object) => {
                serde_json::to_string(object).unwrap_or_else(|_| format!("{object:?}"))
            }
            RawTurn::Opaque(Value::String(text)) => text.clone(),
            RawTurn::Opaque(value) => value.to_string(),
        }
    }
}

type SpeakerProbe = fn(&RawTurn) -> Option<String>;

// Order is precedence: the first probe that answers wins.
const SPEAKER_PROBES: [SpeakerProbe; 4] = [probe_name, probe_source, probe_role, probe_sender];

fn probe_name(raw: &RawTurn) -> Option<String> {
    raw.text_field("name").map(str::to_string)
}

fn probe_source(raw: &RawTurn) -> Option<String> {
    raw.text_field("source").map(str::to_string)
}

fn probe_role(raw: &RawTurn) -> Option<String> {
    raw.text_field("role").map(display_case)
}

fn probe_sender(raw: &RawTurn) -> Option<String> {
    raw.sender_name().map(str::to_string)
}

fn display_case(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn resolve_speaker(raw: &RawTurn) -> String {
    let speaker = SPEAKER_PROBES
        .iter()
        .find_map(|probe| probe(raw))
        .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());

    if speaker == CLI_INPUT_SPEAKER {
        CUSTOMER_SPEAKER.to_string()
    } else {
        speaker
    }
}

/// Returns the content and whether the fallback representation was used.
fn resolve_content(raw: &RawTurn) -> (String, bool) {
    let text = match raw {
        RawTurn::Mapping(map) => map.get("content").and_then(Value::as_str),
        RawTurn::Object(object) => object.content.as_ref().and_then(Value::as_str),
        RawTurn::Opaque(_) => None,
    };

    match text {
        Some(text) => (text.to_string(), false),
        None => (raw.textual_representation(), true),
    }
}

/// Converts any raw turn into a canonical record. Never fails.
pub fn normalize(raw: &RawTurn) -> TranscriptMessage {
    let speaker = resolve_speaker(raw);
    let (content, fallback) = resolve_content(raw);

    if fallback {
        warn!(speaker = %speaker, raw = ?raw, "message has no text content; using its textual representation");
    }

    TranscriptMessage { speaker, content }
}
