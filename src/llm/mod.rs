//! Language model completion boundary.
//!
//! The turn coordinator only sees the [`CompletionClient`] trait. The HTTP
//! adapter for OpenAI-compatible servers (LM Studio, Ollama, vLLM,
//! llama.cpp server, etc.) lives in [`api`].

pub mod api;
pub mod error;

pub use api::ApiCompletionClient;
pub use error::CompletionError;

use crate::conversation::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One role/content pair as sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single-attempt completion backend.
///
/// Implementations send `messages` verbatim and return the trimmed reply
/// text. They must not retry and must not touch conversation state.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}
