//! Error types for the adapter layer.
//!
//! A single [`AdapterError`] covers every failure a caller can observe,
//! whether it is raised synchronously (validation, configuration, dispatch)
//! or delivered through a stream (session errors, hosted stream failures).

use thiserror::Error;

/// HTTP status code reported by providers when a caller is rate limited.
pub const RATE_LIMIT_STATUS: u16 = 429;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors produced by the adapter layer.
///
/// The type is `Clone` so that one terminal error can be handed to every
/// consumer waiting on an event queue.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Conversation or structured output schema does not have the required shape.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// Requested provider or model has no resolvable backend configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is missing.
        message: String,
    },

    /// Sending the outbound message to a live session failed.
    #[error("failed to dispatch message to session: {message}")]
    Dispatch {
        /// Underlying send failure.
        message: String,
    },

    /// The agent backend reported an error mid-turn.
    #[error("session error: {message}")]
    Session {
        /// Error message reported by the backend.
        message: String,
        /// Backend error category, when supplied.
        kind: Option<String>,
    },

    /// A hosted provider rejected the call with a rate-limit status.
    #[error("rate limited by {provider}: {message}")]
    RateLimited {
        /// Provider name.
        provider: String,
        /// Provider-supplied detail.
        message: String,
    },

    /// Releasing a session failed. Logged, never returned to callers.
    #[error("session cleanup failed: {message}")]
    Cleanup {
        /// Underlying failure.
        message: String,
    },

    /// A hosted API request failed.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Error detail.
        message: String,
        /// HTTP status, when known.
        status: Option<u16>,
    },

    /// A hosted stream failed after it started.
    #[error("stream error: {message}")]
    Stream {
        /// Error detail.
        message: String,
    },

    /// A provider response could not be parsed.
    #[error("failed to parse response: {message}")]
    ResponseParse {
        /// Parse failure detail.
        message: String,
    },

    /// Structured output did not conform to the requested schema.
    #[error("output does not match schema: {message}")]
    SchemaValidation {
        /// Deserialization failure detail.
        message: String,
        /// The raw output that failed validation.
        output: String,
    },

    /// No provider is registered under the requested name.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// Requested provider name.
        name: String,
    },

    /// The provider family does not offer the requested operation.
    #[error("{provider} does not support {operation}")]
    Unsupported {
        /// Provider name.
        provider: String,
        /// Operation name.
        operation: &'static str,
    },

    /// A hosted provider requires an API key that was not configured.
    #[error("no API key configured for {provider}")]
    ApiKeyMissing {
        /// Provider name.
        provider: String,
    },

    /// I/O failure talking to the local agent process.
    #[error("agent process error: {message}")]
    Process {
        /// Error detail.
        message: String,
    },
}

impl AdapterError {
    /// Shorthand for [`AdapterError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for [`AdapterError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wraps a failed send as [`AdapterError::Dispatch`].
    #[must_use]
    pub fn dispatch(cause: Self) -> Self {
        match cause {
            Self::Dispatch { .. } => cause,
            other => Self::Dispatch {
                message: other.to_string(),
            },
        }
    }

    /// Shorthand for [`AdapterError::Process`].
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    /// Returns `true` if the error is a rate-limit condition.
    ///
    /// Hosted failures are classified when they are created, but an
    /// [`AdapterError::ApiRequest`] carrying a 429 status also counts.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::ApiRequest { status, .. } => matches!(status, Some(RATE_LIMIT_STATUS)),
            _ => false,
        }
    }

    /// Returns `true` if the error was raised before any provider call was made.
    #[must_use]
    pub const fn is_pre_call(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Configuration { .. }
                | Self::UnsupportedProvider { .. }
                | Self::ApiKeyMissing { .. }
        )
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseParse {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        Self::Process {
            message: err.to_string(),
        }
    }
}
