//! Colloquy: turn-taking orchestrator for voice assistants.
//!
//! A session cycles through listening, generating and speaking:
//! Transcript source → Context store → Completion backend → Output sink
//!
//! # Architecture
//!
//! - **Context store** ([`conversation::ContextStore`]): bounded per-session
//!   history with provisional user turns that are rolled back when the
//!   backend fails.
//! - **Turn-taking state machine** ([`conversation::TurnMachine`]): pure
//!   transitions between idle, listening, generating and speaking.
//! - **Completion client** ([`llm::CompletionClient`]): single-attempt calls
//!   to an OpenAI-compatible `/v1/chat/completions` endpoint.
//! - **Session registry** ([`conversation::SessionRegistry`]): isolated
//!   sessions keyed by id, one per connected client.
//! - **Turn coordinator** ([`pipeline::TurnCoordinator`]): runs one session,
//!   racing stop/clear commands against output.
//! - **Gateway** ([`gateway`]): WebSocket front-end, one session per connection.

pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod pipeline;


pub use config::ColloquyConfig;
pub use conversation::{SessionId, SessionRegistry, TurnState};
pub use error::{DialogueError, Result};
pub use llm::{ApiCompletionClient, CompletionClient, CompletionError};
pub use pipeline::TurnCoordinator;
