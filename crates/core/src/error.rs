//! Error types for the HostBridge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for HostBridge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model backend errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Bridge / transport errors ---
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a model backend. Every variant is terminal for the
/// session that observes it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed backend reply: {0}")]
    MalformedReply(String),

    #[error("On-device inference failed: {0}")]
    InferenceFailed(String),
}

/// Failures of the runtime boundary itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The reasoning runtime has not been initialized (or was shut down).
    /// The host should retry after a successful `initialize`.
    #[error("Reasoning runtime is not initialized")]
    Uninitialized,

    /// The transport lanes are gone; no further calls can be served.
    #[error("Bridge closed: {0}")]
    Closed(String),

    #[error("Invalid parameters for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Stable machine-readable code sent to the native host.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Closed(_) => "closed",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn bridge_error_codes_are_stable() {
        assert_eq!(BridgeError::Uninitialized.code(), "uninitialized");
        assert_eq!(BridgeError::Closed("gone".into()).code(), "closed");
        let err = BridgeError::InvalidParams {
            method: "handleQuery".into(),
            reason: "missing text".into(),
        };
        assert_eq!(err.code(), "invalid_params");
        assert!(err.to_string().contains("handleQuery"));
    }
}
