//! Bounded per-session conversation history.
//!
//! The store holds completed user/assistant exchanges plus, while a reply is
//! being generated, a single provisional user turn at the tail. A failed
//! completion removes the provisional turn again, so the stored history only
//! ever reflects exchanges that actually finished.
//!
//! The system instruction is never stored. It is folded into the first
//! rendered turn when building a backend request, so it survives eviction of
//! the oldest pairs without any extra bookkeeping.

use super::types::{Role, Turn};
use crate::llm::ChatMessage;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredTurn {
    turn: Turn,
    provisional: bool,
    seq: u64,
}

/// Handle to a provisional user turn returned by [`ContextStore::append_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct PendingTurn {
    seq: u64,
}

/// Ordered, bounded turn history owned by one session.
#[derive(Debug, Clone)]
pub struct ContextStore {
    turns: Vec<StoredTurn>,
    max_turns: usize,
    instruction: String,
    next_seq: u64,
}

impl ContextStore {
    /// Create an empty store keeping at most `2 * max_turns` turns.
    ///
    /// `max_turns` is clamped to at least 1.
    pub fn new(max_turns: usize, instruction: impl Into<String>) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
            instruction: instruction.into(),
            next_seq: 0,
        }
    }

    /// Append a provisional user turn.
    ///
    /// A provisional turn already at the tail is discarded first.
    pub fn append_user(&mut self, text: impl Into<String>) -> PendingTurn {
        if self.has_pending() {
            debug!("discarding stale provisional user turn");
            self.turns.pop();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.turns.push(StoredTurn {
            turn: Turn::user(text),
            provisional: true,
            seq,
        });
        PendingTurn { seq }
    }

    /// Finalize the provisional user turn with the assistant's reply, then trim.
    ///
    /// Returns `false` and stores nothing when no provisional turn is pending,
    /// e.g. because history was cleared while the reply was in flight.
    pub fn commit_assistant(&mut self, text: impl Into<String>) -> bool {
        let Some(last) = self.turns.last_mut().filter(|t| t.provisional) else {
            return false;
        };
        last.provisional = false;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.turns.push(StoredTurn {
            turn: Turn::assistant(text),
            provisional: false,
            seq,
        });
        self.trim();
        true
    }

    /// Remove the tail turn iff it is provisional. Safe to call repeatedly.
    pub fn rollback_last_user(&mut self) -> bool {
        if self.has_pending() {
            self.turns.pop();
            true
        } else {
            false
        }
    }

    /// Remove the provisional turn identified by `handle`, if it is still at the tail.
    pub fn rollback(&mut self, handle: PendingTurn) -> bool {
        match self.turns.last() {
            Some(t) if t.provisional && t.seq == handle.seq => {
                self.turns.pop();
                true
            }
            _ => false,
        }
    }

    /// Build the backend request messages.
    ///
    /// Entry 0, when it is a user turn, becomes
    /// `"[System Instructions: {instruction}]\n\nUser: {content}"`.
    /// Stored content is not modified.
    pub fn render_for_backend(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .enumerate()
            .map(|(i, stored)| {
                let turn = &stored.turn;
                let content = if i == 0 && turn.role == Role::User && !self.instruction.is_empty()
                {
                    format!(
                        "[System Instructions: {}]\n\nUser: {}",
                        self.instruction, turn.content
                    )
                } else {
                    turn.content.clone()
                };
                ChatMessage {
                    role: turn.role,
                    content,
                }
            })
            .collect()
    }

    /// Drop all turns, provisional or not.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Stored turns in insertion order, raw content.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> + '_ {
        self.turns.iter().map(|t| &t.turn)
    }

    /// Whether a provisional user turn is waiting for its reply.
    pub fn has_pending(&self) -> bool {
        self.turns.last().is_some_and(|t| t.provisional)
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    // Only ever called right after a commit, so no provisional turn exists.
    fn trim(&mut self) {
        let limit = self.max_turns * 2;
        while self.turns.len() > limit {
            let drop = self.turns.len().min(2);
            self.turns.drain(..drop);
        }
    }
}
