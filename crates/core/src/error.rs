//! Error types for the Convoy domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! The taxonomy follows how far a failure is allowed to travel:
//! configuration problems stop a request before any network call, upstream
//! failures are surfaced verbatim, and tool failures stay inside their round.

use thiserror::Error;

/// The top-level error type for all Convoy operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Upstream (remote completion endpoint) errors ---
    #[error("Upstream error: {0}")]
    Upstream(#[from] ProviderError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the request.
    ///
    /// Only transient upstream failures qualify; the engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias using our Error.
///
/// Tool failures never appear here: [`ToolError`] is contained per call and
/// handed back to the model as a tool result.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Unexpected response shape: {0}")]
    InvalidResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Transport-level failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout(_)
                | Self::Network(_)
                | Self::StreamInterrupted(_)
        ) || matches!(self, Self::ApiError { status_code, .. } if *status_code >= 500)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
