//! Timestamped record of everything said during a run.
//!
//! When bound to a file, the whole log is rewritten as a pretty-printed JSON
//! array after every append, so the file on disk is complete up to the last
//! entry even if the process dies mid-run.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, SecondsFormat, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::agents::AgentRole;

const PREVIEW_CHARS: usize = 100;

// Speakers whose entries bound the conversation duration.
const CONVERSATIONAL_SPEAKERS: [&str; 5] = ["customer", "staff", "user_cli_input", "user", "system"];

fn is_conversational(speaker: &str) -> bool {
    CONVERSATIONAL_SPEAKERS
        .iter()
        .any(|known| speaker.eq_ignore_ascii_case(known))
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to access conversation log {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("conversation log {} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub speaker: String,
    pub content: String,
}

impl LogEntry {
    /// Stamps the entry with the current local time.
    pub fn now(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self::at(
            Local::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            speaker,
            content,
        )
    }

    pub fn at(timestamp: impl Into<String>, speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            speaker: speaker.into(),
            content: content.into(),
        }
    }

    /// Accepts RFC 3339 stamps and offset-less ISO-8601 stamps (read as UTC).
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.timestamp)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total_logged_entries: usize,
    pub customer_messages: usize,
    pub staff_messages: usize,
    pub actual_conversation_turns: usize,
    pub duration_seconds: Option<f64>,
    pub duration_formatted: String,
}

#[derive(Debug, Default)]
pub struct ConversationLog {
    entries: Vec<LogEntry>,
    path: Option<PathBuf>,
}

impl ConversationLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Binds the log to `path`. Nothing is written until the first append.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            path: Some(path.into()),
        }
    }

    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Self { entries, path: None }
    }

    /// Reads a previously persisted log. The result is not bound to the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = serde_json::from_str(&raw).map_err(|source| LogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_entries(entries))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records one utterance. A failed write is logged and the entry is kept
    /// in memory; the run carries on.
    pub fn append(&mut self, speaker: &str, content: &str) -> &LogEntry {
        self.entries.push(LogEntry::now(speaker, content));

        if let Err(err) = self.persist() {
            error!(error = %err, "failed to write conversation log");
        }

        info!("Chat Logged - [{}]: {}", speaker, preview(content));
        &self.entries[self.entries.len() - 1]
    }

    fn persist(&self) -> Result<(), LogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| LogError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(path, json).map_err(|source| LogError::Io {
            path: path.clone(),
            source,
        })
    }

    /// Summary counts and wall-clock duration. `None` when nothing was logged.
    ///
    /// Speakers are matched case-insensitively. The duration spans the first
    /// to the last conversational entry, so evaluator verdicts and unknown
    /// speakers never move its boundaries.
    pub fn stats(&self) -> Option<ConversationStats> {
        if self.entries.is_empty() {
            return None;
        }

        let count = |role: AgentRole| {
            self.entries
                .iter()
                .filter(|e| e.speaker.eq_ignore_ascii_case(role.name()))
                .count()
        };
        let customer_messages = count(AgentRole::Customer);
        let staff_messages = count(AgentRole::Staff);

        let mut conversational = self.entries.iter().filter(|e| is_conversational(&e.speaker));
        let first = conversational.next();
        let last = conversational.last().or(first);

        let duration = match (
            first.and_then(LogEntry::parsed_timestamp),
            last.and_then(LogEntry::parsed_timestamp),
        ) {
            (Some(start), Some(end)) => Some(end.signed_duration_since(start)),
            _ => None,
        };

        Some(ConversationStats {
            total_logged_entries: self.entries.len(),
            customer_messages,
            staff_messages,
            actual_conversation_turns: customer_messages + staff_messages,
            duration_seconds: duration.map(|d| d.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0),
            duration_formatted: duration
                .map(format_duration)
                .unwrap_or_else(|| "N/A".to_string()),
        })
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Formats as `[D day(s), ]H:MM:SS[.ffffff]`.
pub fn format_duration(duration: TimeDelta) -> String {
    let negative = duration < TimeDelta::zero();
    let micros = duration.num_microseconds().unwrap_or(i64::MAX).unsigned_abs();

    let fraction = micros % 1_000_000;
    let total_seconds = micros / 1_000_000;
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        let unit = if days == 1 { "day" } else { "days" };
        out.push_str(&format!("{days} {unit}, "));
    }
    out.push_str(&format!("{hours}:{minutes:02}:{seconds:02}"));
    if fraction > 0 {
        out.push_str(&format!(".{fraction:06}"));
    }
    out
}
