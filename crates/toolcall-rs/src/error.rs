//! Error types.
//!
//! Only [`ProviderError`] can end an execution loop early. [`ToolError`]s are
//! absorbed into the conversation so the model can adapt, and
//! [`ConfigError`] surfaces while loading an
//! [`EngineConfig`](crate::agent::config::EngineConfig).

use thiserror::Error;

/// Failure of the model-completion call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Rate limiting or quota exhaustion. Never retried.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network hiccups and 5xx responses. Retried when retries are configured.
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider failure: {0}")]
    Other(String),
}

impl ProviderError {
    /// Classify a free-form provider error message.
    ///
    /// Adapters that only have an error string (HTTP status lines, SDK
    /// messages) use this to pick the right variant.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if crate::api::retry::is_rate_limit_error(&message) {
            ProviderError::RateLimited(message)
        } else if crate::api::retry::is_transient_error(&message)
            && !crate::api::retry::is_permanent_error(&message)
        {
            ProviderError::Transient(message)
        } else {
            ProviderError::Other(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// The underlying reason without the variant prefix.
    pub fn reason(&self) -> &str {
        match self {
            ProviderError::RateLimited(r)
            | ProviderError::Transient(r)
            | ProviderError::Other(r) => r,
        }
    }
}

/// Failure reported by a tool backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("tool '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::Failed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ToolError::NotFound(_))
    }
}

/// Failure while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
