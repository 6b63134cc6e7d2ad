//! Error types for the hoptix pipeline core.

use thiserror::Error;

/// One of the six error kinds the core surfaces to the orchestrator.
///
/// The kind decides disposition: retry, fail the task, demote to a
/// diagnostic, or propagate a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientExternal,
    PermanentExternal,
    InputMalformed,
    ConstraintViolation,
    CapacityExceeded,
    Cancelled,
}

/// Library-level error type for pipeline operations.
#[derive(Error, Debug)]
pub enum HoptixError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transient external failure: {0}")]
    TransientExternal(String),

    #[error("Permanent external failure: {0}")]
    PermanentExternal(String),

    #[error("Malformed input: {0}")]
    InputMalformed(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Splitter error: {0}")]
    Splitter(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Grading failed: {0}")]
    Grading(String),

    #[error("Diarization failed: {0}")]
    Diarization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Reasoner API error: {0}")]
    Reasoner(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl HoptixError {
    /// Classify this error into the disposition the orchestrator acts on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HoptixError::TransientExternal(_) | HoptixError::Http(_) => ErrorKind::TransientExternal,
            HoptixError::PermanentExternal(_)
            | HoptixError::Reasoner(_)
            | HoptixError::NotFound(_)
            | HoptixError::Database(_) => ErrorKind::PermanentExternal,
            HoptixError::InputMalformed(_)
            | HoptixError::InvalidInput(_)
            | HoptixError::Json(_)
            | HoptixError::TomlParse(_) => ErrorKind::InputMalformed,
            HoptixError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            HoptixError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            HoptixError::Cancelled => ErrorKind::Cancelled,
            HoptixError::Config(_)
            | HoptixError::Splitter(_)
            | HoptixError::Transcription(_)
            | HoptixError::Grading(_)
            | HoptixError::Diarization(_)
            | HoptixError::Io(_) => ErrorKind::PermanentExternal,
        }
    }

    /// Whether the retry policy in [`crate::retry`] should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientExternal
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, HoptixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = HoptixError::TransientExternal("connection reset".to_string());
        assert_eq!(err.kind(), ErrorKind::TransientExternal);
        assert!(err.is_retryable());
    }

    #[test]
    fn constraint_violations_are_not_retryable() {
        let err = HoptixError::ConstraintViolation("offers > opportunities".to_string());
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn cancelled_has_its_own_kind() {
        assert_eq!(HoptixError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
