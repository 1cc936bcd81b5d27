//! Completion backend errors.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`CompletionError::code()`].

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Connection refused, DNS failure, or request timeout.
    pub const BACKEND_UNREACHABLE: &str = "BACKEND_UNREACHABLE";

    /// The backend answered with a non-success status.
    pub const BACKEND_REJECTED: &str = "BACKEND_REJECTED";

    /// Success status, but the body lacked the expected reply field.
    pub const MALFORMED_RESPONSE: &str = "MALFORMED_RESPONSE";
}

/// Failure of a single completion attempt.
///
/// None of these are retried by the client. The turn coordinator rolls the
/// provisional user turn back and speaks a fallback reply instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// The backend could not be reached (connection or timeout).
    #[error("[{}] {}", error_codes::BACKEND_UNREACHABLE, .0)]
    BackendUnreachable(String),

    /// The backend returned a non-success HTTP status.
    #[error("[{}] HTTP {status}: {body}", error_codes::BACKEND_REJECTED)]
    BackendRejected {
        /// HTTP status code.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// The backend answered successfully but without a usable reply.
    #[error("[{}] {}", error_codes::MALFORMED_RESPONSE, .0)]
    MalformedResponse(String),
}

impl CompletionError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackendUnreachable(_) => error_codes::BACKEND_UNREACHABLE,
            Self::BackendRejected { .. } => error_codes::BACKEND_REJECTED,
            Self::MalformedResponse(_) => error_codes::MALFORMED_RESPONSE,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::BackendUnreachable(m) | Self::MalformedResponse(m) => m,
            Self::BackendRejected { body, .. } => body,
        }
    }
}
