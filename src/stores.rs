// Session history store collaborators
//
// The coordinator's only interaction with history is handing it a finalized
// session; an unavailable store is a no-op, never a failure.

use std::sync::Mutex;

use crate::models::Session;

/// Append-only store of finalized sessions
pub trait SessionHistoryStore: Send + Sync {
    fn persist(&self, session: &Session);
}

/// No-op store used when history is unavailable or unwanted
pub struct NullHistoryStore;

impl SessionHistoryStore for NullHistoryStore {
    fn persist(&self, _session: &Session) {}
}

/// In-memory store, used by tests and the CLI
#[derive(Default)]
pub struct MemoryHistoryStore {
    sessions: Mutex<Vec<Session>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SessionHistoryStore for MemoryHistoryStore {
    fn persist(&self, session: &Session) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(session.clone());
        }
    }
}
