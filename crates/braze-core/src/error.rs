//! Unified error types for the braze core library.
//!
//! Every remote-reported failure is mapped to a variant of [`ApiError`] by the
//! client crate; nothing at or below that layer swallows an error. Transport
//! read timeouts get their own variant so callers can tell "the service said
//! no" apart from "the service never answered".

use std::time::Duration;

use thiserror::Error;

/// Errors produced by remote API calls and client construction.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// HTTP 401 — the bot token has been revoked or never existed.
    #[error("unauthorized: {description}")]
    Unauthorized {
        /// Human-readable description from the service.
        description: String,
    },

    /// HTTP 403 — the bot is not allowed to perform the operation, most
    /// commonly because the target user has blocked it.
    #[error("forbidden: {description}")]
    Forbidden {
        /// Human-readable description from the service.
        description: String,
    },

    /// HTTP 404 — unknown operation or target.
    #[error("not found: {description}")]
    NotFound {
        /// Human-readable description from the service.
        description: String,
    },

    /// HTTP 409 — another poller is consuming this bot's update stream.
    #[error("conflict: {description}")]
    Conflict {
        /// Human-readable description from the service.
        description: String,
    },

    /// HTTP 429 — flood control, optionally carrying a retry-after hint.
    #[error("too many requests: {description}")]
    TooManyRequests {
        /// Human-readable description from the service.
        description: String,
        /// How long the service asked us to wait, when it said.
        retry_after: Option<Duration>,
    },

    /// HTTP 400 with the message-too-long marker.
    #[error("message too long: {description}")]
    TooLong {
        /// Human-readable description from the service.
        description: String,
    },

    /// HTTP 400 with the message-not-modified marker — an edit that would
    /// change nothing.
    #[error("message not modified: {description}")]
    Unmodified {
        /// Human-readable description from the service.
        description: String,
    },

    /// Any other `{ok: false}` envelope.
    #[error("api error {error_code}: {description}")]
    Api {
        /// Numeric error code from the envelope.
        error_code: i64,
        /// Human-readable description from the service.
        description: String,
    },

    /// The request did not complete within the configured timeout. Expected
    /// under long-poll; retried with backoff by the poll loop.
    #[error("request timed out")]
    Timeout,

    /// Any other transport-level failure (connection reset, TLS, DNS, or an
    /// unparseable response body).
    #[error("transport error: {0}")]
    Transport(String),

    /// The bot token does not have the `<numeric-id>:<secret>` shape. Raised
    /// at construction, never deferred to the first call.
    #[error("invalid bot token shape")]
    InvalidToken,
}

impl ApiError {
    /// Returns the retry-after hint for [`ApiError::TooManyRequests`].
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TooManyRequests { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for remote API operations.
pub type ApiResult<T> = Result<T, ApiError>;
