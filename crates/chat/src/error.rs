//! Chat orchestration error types.

use switchboard_core::Error as CoreError;
use switchboard_providers::ProviderError;
use thiserror::Error;

/// Errors returned by the chat orchestrator and provider service.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid input or request.
    #[error("{0}")]
    InvalidInput(String),

    /// A required credential could not be resolved.
    #[error("missing required credential: {0}")]
    MissingCredential(String),

    /// A secret-looking value was supplied for a plain field.
    #[error("Sensitive value not allowed in plain field '{0}'")]
    SensitiveInput(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider error (transport, API or stream).
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// Core error from switchboard-core.
    #[error("Core error: {0}")]
    Core(CoreError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// Create a new invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error stems from caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Provider(err) if err.is_cancelled())
    }

    /// HTTP status reported by the provider, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ChatError::Provider(err) => err.status_code(),
            _ => None,
        }
    }
}

/// Error code for programmatic handling in stream events.
impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::InvalidInput(_) => "INVALID_INPUT",
            ChatError::MissingCredential(_) => "MISSING_CREDENTIAL",
            ChatError::SensitiveInput(_) => "SENSITIVE_INPUT",
            ChatError::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            ChatError::Provider(_) => "PROVIDER_ERROR",
            ChatError::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            ChatError::Core(_) => "CORE_ERROR",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingCredential(label) => ChatError::MissingCredential(label),
            other => ChatError::Provider(other),
        }
    }
}

impl From<CoreError> for ChatError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConversationNotFound(id) => ChatError::ConversationNotFound(id),
            CoreError::Validation(validation) => ChatError::InvalidInput(validation.to_string()),
            other => ChatError::Core(other),
        }
    }
}
