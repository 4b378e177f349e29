//! Error types for provider operations.

use thiserror::Error;

/// Errors that can occur while configuring or talking to a chat provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider configuration is unusable (bad URL, unknown field, ...).
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// A required credential is not configured on the adapter.
    #[error("missing required credential: {0}")]
    MissingCredential(String),

    /// The provider rejected the credentials (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Auth {
        /// HTTP status returned by the provider
        status: u16,
        /// Error text returned by the provider
        message: String,
    },

    /// The provider answered with a non-success status.
    #[error("Provider returned {status}: {message}")]
    Api {
        /// HTTP status returned by the provider
        status: u16,
        /// Error text returned by the provider
        message: String,
    },

    /// The provider could not be reached or the transport broke mid-stream.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not finish in time.
    #[error("Request timed out")]
    Timeout,

    /// The stream was cancelled by the caller.
    #[error("Stream cancelled")]
    Cancelled,

    /// The provider sent a payload we could not decode.
    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    /// The adapter does not implement the requested operation.
    #[error("{operation} is not supported by {provider}")]
    NotSupported {
        /// Name of the unsupported operation
        operation: String,
        /// Provider that was asked
        provider: String,
    },
}

impl ProviderError {
    /// Whether this error is the result of caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP-style status code associated with the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::Timeout => Some(408),
            _ => None,
        }
    }

    /// Map an HTTP error status and body into the matching variant.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_error_message(body);
        match status {
            401 | 403 => Self::Auth { status, message },
            _ => Self::Api { status, message },
        }
    }

    /// Create a not-supported error for `provider`.
    pub fn not_supported(operation: &str, provider: &str) -> Self {
        Self::NotSupported {
            operation: operation.to_string(),
            provider: provider.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Pull a readable message out of a JSON error body, falling back to the raw text.
///
/// Handles the `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}` shapes used by the supported APIs.
fn extract_error_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let nested = value
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str());
        if let Some(message) = nested.or_else(|| value.get("message").and_then(|m| m.as_str())) {
            return message.to_string();
        }
    }
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_auth() {
        let err = ProviderError::from_status(401, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(
            err,
            ProviderError::Auth {
                status: 401,
                message: "bad key".to_string()
            }
        );
        assert_eq!(err.status_code(), Some(401));
    }

    #[test]
    fn test_from_status_plain_error_string() {
        let err = ProviderError::from_status(500, r#"{"error":"model not loaded"}"#);
        assert_eq!(err.to_string(), "Provider returned 500: model not loaded");
    }

    #[test]
    fn test_from_status_non_json_body() {
        let err = ProviderError::from_status(502, "  Bad Gateway ");
        assert_eq!(err.to_string(), "Provider returned 502: Bad Gateway");
    }

    #[test]
    fn test_cancelled_classification() {
        assert!(ProviderError::Cancelled.is_cancelled());
        assert!(!ProviderError::Timeout.is_cancelled());
        assert_eq!(ProviderError::Cancelled.status_code(), None);
    }
}
