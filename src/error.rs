// src/error.rs
//! Error kinds of the relay core.
//!
//! Only `FetchFailure` ends a cycle early. `SendFailure` is retried and then turned
//! into a failed history entry, `InternalConsistency` disables a single rule for the
//! cycle, and `InvalidPattern` never gets past rule creation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid regex pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unknown category `{0}`")]
    UnknownCategory(String),

    #[error("rule `{0}` already exists for this scope")]
    DuplicateRule(String),

    #[error("feed fetch failed: {0}")]
    FetchFailure(String),

    #[error("send failed: {0}")]
    SendFailure(String),

    #[error("stored rule #{rule_id} is inconsistent: {reason}")]
    InternalConsistency { rule_id: i64, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        RelayError::Storage(e.to_string())
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
