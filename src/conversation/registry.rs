//! Session registry.
//!
//! Maps session ids to isolated [`Session`]s. Each session sits behind its
//! own mutex; the map lock is only held for insert, lookup and removal,
//! never across session work.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::session::{Session, SessionSettings};
use super::types::SessionId;

/// Shared handle to a live session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Registry of live sessions. Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
    settings: Arc<SessionSettings>,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            settings: Arc::new(settings),
        }
    }

    /// Create a fresh session and return its id.
    pub async fn create(&self) -> SessionId {
        let mut sessions = self.sessions.write().await;
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        let session = Session::new(id.clone(), &self.settings);
        sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(session = %id, live = sessions.len(), "session created");
        id
    }

    /// Look up a live session. Destroyed or unknown ids yield `None`.
    pub async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session, mark it terminated and drop its history.
    ///
    /// Terminating cancels the session's ended token, which stops a
    /// coordinator still driving it. Idempotent. Returns `true` if the
    /// session was live.
    pub async fn destroy(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(handle) => {
                handle.lock().await.terminate();
                info!(session = %id, "session destroyed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of all live sessions, sorted.
    pub async fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}
