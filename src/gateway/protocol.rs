//! JSON text-frame protocol spoken over `/ws`.

use crate::conversation::SessionId;
use serde::{Deserialize, Serialize};

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A finalized utterance (typed or transcribed client-side).
    Text { text: String },
    /// Clear the session's history.
    Clear,
    /// Stop the reply currently being spoken.
    Stop,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { session_id: SessionId },
    Response { text: String },
    HistoryCleared,
}
