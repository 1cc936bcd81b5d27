//! A single dialogue session: one context store plus one state machine.

use super::context::ContextStore;
use super::state::{TurnEvent, TurnMachine, TurnState};
use super::types::SessionId;
use crate::config::ConversationConfig;
use tokio_util::sync::CancellationToken;

/// Per-session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_turns: usize,
    pub instruction: String,
    pub continuous: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ConversationConfig::default())
    }
}

impl From<&ConversationConfig> for SessionSettings {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            instruction: config.system_prompt.clone(),
            continuous: config.continuous,
        }
    }
}

/// Isolated conversation state for one connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    context: ContextStore,
    machine: TurnMachine,
    ended: CancellationToken,
}

impl Session {
    pub fn new(id: SessionId, settings: &SessionSettings) -> Self {
        Self {
            id,
            context: ContextStore::new(settings.max_turns, settings.instruction.clone()),
            machine: TurnMachine::new(settings.continuous),
            ended: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextStore {
        &mut self.context
    }

    pub fn state(&self) -> TurnState {
        self.machine.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.machine.is_terminated()
    }

    /// Token cancelled once the session reaches [`TurnState::Terminated`].
    ///
    /// Whoever drives the session watches it so that a `destroy` from
    /// elsewhere stops the session promptly.
    pub fn ended_token(&self) -> CancellationToken {
        self.ended.clone()
    }

    /// Feed an event to the state machine.
    pub fn apply(&mut self, event: TurnEvent) -> TurnState {
        let state = self.machine.apply(event);
        if state == TurnState::Terminated {
            self.ended.cancel();
        }
        state
    }

    /// Clear history and feed [`TurnEvent::ClearHistory`].
    pub fn clear_history(&mut self) -> TurnState {
        self.context.clear();
        self.apply(TurnEvent::ClearHistory)
    }

    /// Move to [`TurnState::Terminated`] and release the history.
    pub fn terminate(&mut self) {
        self.context.clear();
        self.apply(TurnEvent::Shutdown);
    }
}
