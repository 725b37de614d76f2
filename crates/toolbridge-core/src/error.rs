//! Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Request is missing a field or carries an invalid one
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider id is not one of the known backends
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Provider needs a secret that the credential does not carry
    #[error("{0} API key is required")]
    MissingCredential(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Tool registry endpoint could not be used
    #[error("Registry error: {endpoint}: {reason}")]
    Registry { endpoint: String, reason: String },

    /// Tool not found in the catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution error: {name}: {reason}")]
    ToolExecution { name: String, reason: String },

    /// Tool did not answer within the per-call timeout
    #[error("Tool '{name}' timed out after {}ms", .timeout.as_millis())]
    ToolTimeout { name: String, timeout: Duration },

    /// Turn ceiling reached in the orchestration loop
    #[error("Maximum turns ({0}) exceeded")]
    MaxTurns(usize),

    /// Caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Parse error (e.g., malformed backend response)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_)
        )
    }
}
