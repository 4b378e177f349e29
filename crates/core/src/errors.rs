//! Core error types for Switchboard.
//!
//! Storage and credential backends convert their own failures into the
//! string-carrying variants here so this type stays backend-agnostic.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for conversation and provider-store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Secret store error: {0}")]
    Secret(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Errors raised when caller input is rejected before any mutation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl Error {
    /// Whether the error originated from rejected caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Unexpected(format!("JSON error: {}", err))
    }
}
