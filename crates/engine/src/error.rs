use thiserror::Error;

use crate::prompt::MAX_PROMPT_CHARS;

/// Rejection of client input or of a record that violates the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Prompt is required and must be a non-empty string")]
    PromptRequired,

    #[error("Prompt must be {MAX_PROMPT_CHARS} characters or less (got {0})")]
    PromptTooLong(usize),

    #[error("Storage key is required")]
    StorageKeyRequired,

    #[error("Format is required")]
    FormatRequired,

    #[error("Invalid status '{0}', expected one of ACTIVE, PROCESSING, FAILED, EXPIRED")]
    InvalidStatus(String),

    #[error("Invalid request body: {0}")]
    Malformed(String),
}
