use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{error, info};

pub const CUSTOMER_PERSONA_FILE: &str = "customer_persona.md";
pub const STAFF_PERSONA_FILE: &str = "staff_persona.md";
pub const EVALUATOR_PROMPT_FILE: &str = "evaluator_prompt.md";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("{description} file not found: {}", .path.display())]
    NotFound { description: &'static str, path: PathBuf },

    #[error("{description} file is empty: {}", .path.display())]
    Empty { description: &'static str, path: PathBuf },

    #[error("failed to read {description} file {}: {source}", .path.display())]
    Io {
        description: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The three instruction texts a conversation run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaBundle {
    customer: String,
    staff: String,
    evaluator: String,
}

impl PersonaBundle {
    /// Rejects blank texts the same way the loader rejects empty files.
    pub fn new(
        customer: impl Into<String>,
        staff: impl Into<String>,
        evaluator: impl Into<String>,
    ) -> Result<Self, PromptError> {
        Ok(Self {
            customer: non_empty(customer.into(), "customer persona", CUSTOMER_PERSONA_FILE)?,
            staff: non_empty(staff.into(), "staff persona", STAFF_PERSONA_FILE)?,
            evaluator: non_empty(evaluator.into(), "evaluator prompt", EVALUATOR_PROMPT_FILE)?,
        })
    }

    /// Reads `customer_persona.md`, `staff_persona.md` and `evaluator_prompt.md`
    /// from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, PromptError> {
        let dir = dir.as_ref();
        Ok(Self {
            customer: load_prompt(&dir.join(CUSTOMER_PERSONA_FILE), "customer persona")?,
            staff: load_prompt(&dir.join(STAFF_PERSONA_FILE), "staff persona")?,
            evaluator: load_prompt(&dir.join(EVALUATOR_PROMPT_FILE), "evaluator prompt")?,
        })
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn staff(&self) -> &str {
        &self.staff
    }

    pub fn evaluator(&self) -> &str {
        &self.evaluator
    }
}

fn non_empty(text: String, description: &'static str, file: &str) -> Result<String, PromptError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PromptError::Empty {
            description,
            path: PathBuf::from(file),
        });
    }
    Ok(trimmed.to_string())
}

fn load_prompt(path: &Path, description: &'static str) -> Result<String, PromptError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            error!(path = %path.display(), "{description} file not found");
            return Err(PromptError::NotFound {
                description,
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            error!(path = %path.display(), error = %source, "failed to read {description} file");
            return Err(PromptError::Io {
                description,
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let content = raw.trim();
    if content.is_empty() {
        error!(path = %path.display(), "{description} file is empty");
        return Err(PromptError::Empty {
            description,
            path: path.to_path_buf(),
        });
    }

    info!(path = %path.display(), "loaded {description}");
    Ok(content.to_string())
}
