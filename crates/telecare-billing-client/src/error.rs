//! Client error types.

/// Errors that can occur when using the billing client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The user is not known to the billing directory.
    #[error("unknown user: {message}")]
    UnknownUser {
        /// Server message.
        message: String,
    },

    /// The plan is not in the catalog.
    #[error("plan not found: {message}")]
    PlanNotFound {
        /// Server message.
        message: String,
    },

    /// The service failed transiently; the request may be repeated.
    #[error("service unavailable: {message}")]
    Retryable {
        /// Server message.
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether repeating the request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retryable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
