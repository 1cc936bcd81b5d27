//! Turn-taking state machine.
//!
//! [`next_state`] is a pure function over (state, event, continuous mode).
//! [`TurnMachine`] wraps it with the current state and transition logging.
//! Side effects (context mutation, output) belong to the coordinator.

use tracing::debug;

/// Phase of a dialogue session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Not listening. Waits for an explicit trigger unless continuous.
    Idle,
    /// Waiting for the next utterance.
    AwaitingInput,
    /// A completion request is in flight.
    Generating,
    /// A reply is being emitted.
    Speaking,
    /// Session ended. Absorbs every event.
    Terminated,
}

impl TurnState {
    #[cfg(test)]
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::AwaitingInput,
        Self::Generating,
        Self::Speaking,
        Self::Terminated,
    ];
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// Session start. Enters listening only in continuous mode.
    Start,
    /// Explicit request to listen.
    Trigger,
    /// An utterance was captured; `intelligible` is false for empty or timed-out capture.
    UtteranceCaptured { intelligible: bool },
    CompletionSucceeded,
    CompletionFailed,
    /// A reply arrived but there was no provisional turn left to commit it to.
    ReplyDiscarded,
    PlaybackFinished,
    StopSpeaking,
    ClearHistory,
    Shutdown,
}

impl TurnEvent {
    #[cfg(test)]
    pub const ALL: [Self; 11] = [
        Self::Start,
        Self::Trigger,
        Self::UtteranceCaptured { intelligible: true },
        Self::UtteranceCaptured {
            intelligible: false,
        },
        Self::CompletionSucceeded,
        Self::CompletionFailed,
        Self::ReplyDiscarded,
        Self::PlaybackFinished,
        Self::StopSpeaking,
        Self::ClearHistory,
        Self::Shutdown,
    ];
}

/// Compute the state following `event`.
pub fn next_state(state: TurnState, event: TurnEvent, continuous: bool) -> TurnState {
    use TurnEvent as E;
    use TurnState as S;

    match (state, event) {
        (S::Terminated, _) | (_, E::Shutdown) => S::Terminated,

        (S::Idle, E::Start) if continuous => S::AwaitingInput,
        (S::Idle, E::Trigger) => S::AwaitingInput,
        (S::Idle, _) => S::Idle,

        (S::AwaitingInput, E::UtteranceCaptured { intelligible: true }) => S::Generating,
        (S::AwaitingInput, _) => S::AwaitingInput,

        (S::Generating, E::CompletionSucceeded) => S::Speaking,
        (S::Generating, E::CompletionFailed | E::ReplyDiscarded) => S::AwaitingInput,
        (S::Generating, _) => S::Generating,

        (S::Speaking, E::PlaybackFinished) if continuous => S::AwaitingInput,
        (S::Speaking, E::PlaybackFinished) => S::Idle,
        (S::Speaking, E::StopSpeaking | E::ClearHistory) => S::AwaitingInput,
        (S::Speaking, _) => S::Speaking,
    }
}

/// State machine instance owned by one session.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    state: TurnState,
    continuous: bool,
}

impl TurnMachine {
    pub fn new(continuous: bool) -> Self {
        Self {
            state: TurnState::Idle,
            continuous,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == TurnState::Terminated
    }

    /// Feed an event and return the new state.
    pub fn apply(&mut self, event: TurnEvent) -> TurnState {
        let next = next_state(self.state, event, self.continuous);
        if next != self.state {
            debug!(from = ?self.state, to = ?next, ?event, "turn transition");
        }
        self.state = next;
        next
    }
}
