//! Session pipeline: transcript sources, output sinks, and the turn coordinator.

pub mod channel_source;
pub mod console;
pub mod coordinator;
pub mod traits;

pub use channel_source::{ChannelTranscriptSource, ClientInput};
pub use coordinator::{DialogueScript, TurnCoordinator, normalize_utterance};
pub use traits::{ControlCommand, OutputSink, SessionNotice, TranscriptError, TranscriptSource};
