//! Dialogue sessions: context history, turn-taking, and the session registry.

pub mod context;
pub mod registry;
pub mod session;
pub mod state;
pub mod types;

pub use context::{ContextStore, PendingTurn};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{Session, SessionSettings};
pub use state::{TurnEvent, TurnMachine, TurnState, next_state};
pub use types::{Role, SessionId, Turn};
