//! Error types for the colloquy orchestrator.

use crate::llm::CompletionError;

/// Top-level error type for dialogue sessions and their front-ends.
///
/// Backend failures are normally absorbed inside a turn cycle (the user
/// hears the fallback reply instead); they only surface here from direct
/// client calls such as `colloquy probe`.
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Unrecoverable transcript device failure. Terminates the session.
    #[error("device failure: {0}")]
    DeviceFailure(String),

    /// The output sink could not deliver a reply.
    #[error("output error: {0}")]
    Output(String),

    /// Completion backend error.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// WebSocket gateway error.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, DialogueError>;
