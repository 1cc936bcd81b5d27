use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Why a transcript source stopped producing utterances.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptError {
    /// Input ended normally (client disconnected, stdin closed).
    #[error("transcript source closed")]
    Closed,
    /// The capture device failed and cannot recover.
    #[error("transcript device failure: {0}")]
    Device(String),
}

/// Produces one finalized utterance per call.
///
/// Implementations must be cancel-safe: the coordinator drops a pending
/// `capture_utterance` future when a control command arrives first.
#[async_trait]
pub trait TranscriptSource: Send {
    /// Wait for the next utterance.
    ///
    /// `Ok(None)` or blank text means nothing intelligible was heard,
    /// including a listen timeout.
    async fn capture_utterance(
        &mut self,
        timeout: Option<Duration>,
        max_duration: Duration,
    ) -> std::result::Result<Option<String>, TranscriptError>;
}

/// Out-of-band session events reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotice {
    HistoryCleared,
}

/// Destination for replies (speech synthesis, a socket, a terminal).
#[async_trait]
pub trait OutputSink: Send {
    /// Emit `text`, resolving once output is complete.
    ///
    /// Dropping the returned future abandons the emission.
    async fn emit(&mut self, text: &str) -> Result<()>;

    /// Stop any output still playing after an abandoned [`emit`](Self::emit).
    async fn cancel(&mut self) {}

    /// Report a session notice, ordered with emitted replies.
    async fn notify(&mut self, notice: SessionNotice) -> Result<()>;
}

/// Commands that reach a session outside the utterance stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start listening (non-continuous mode).
    Trigger,
    /// Cut the current reply short.
    StopSpeaking,
    /// Cut the current reply short and forget the conversation.
    ClearHistory,
    /// End the session.
    Shutdown,
}
