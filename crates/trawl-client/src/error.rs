use thiserror::Error;

/// Errors returned by [`crate::RateLimitedClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request did not complete within the configured timeout.
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// Connection or TLS failure from the underlying HTTP client.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// HTTP 429. `retry_after_secs` comes from `Retry-After` (default 60).
    #[error("rate limited on {endpoint}; retry after {retry_after_secs}s")]
    RateLimited {
        endpoint: String,
        retry_after_secs: u64,
    },

    #[error("server error {status} from {endpoint}")]
    Server { status: u16, endpoint: String },

    /// Any 4xx other than 429. Never retried.
    #[error("client error {status} from {endpoint}: {body}")]
    Client {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Retry budget spent; carries the last failure.
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<ApiError> },

    /// A wait was interrupted by the stop signal.
    #[error("request cancelled by stop signal")]
    Cancelled,

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ApiError {
    /// Returns `true` for transient failures worth another attempt.
    ///
    /// Timeouts, connection failures, 5xx and 429 are transient. Client
    /// errors, bad payloads, cancellation and exhaustion are final.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            ApiError::Timeout { .. } | ApiError::Server { .. } | ApiError::RateLimited { .. } => {
                true
            }
            ApiError::Transport(e) => e.is_timeout() || e.is_connect(),
            ApiError::Client { .. }
            | ApiError::Deserialize { .. }
            | ApiError::Exhausted { .. }
            | ApiError::Cancelled
            | ApiError::InvalidBaseUrl(_) => false,
        }
    }
}
