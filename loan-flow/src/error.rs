use thiserror::Error;

/// Errors raised by the loan flow and its collaborators
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("A loan decision is already in flight for session {0}")]
    DecisionInFlight(String),

    #[error("No loan decision is pending for session {0}")]
    NoPendingDecision(String),

    #[error("Unknown language code: {0}")]
    UnknownLanguage(String),

    #[error("Translation table error: {0}")]
    Translation(String),

    #[error("Identity provider error: {0}")]
    Identity(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid decision policy: {0}")]
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::StorageError(err.to_string())
    }
}
