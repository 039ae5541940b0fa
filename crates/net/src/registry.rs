//! Registry of live server-side sessions
//!
//! Broadcasts iterate over a snapshot, so accepts and removals never wait
//! on a broadcast that is blocked writing to a slow peer.

use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::session::{Session, SessionInfo};

/// Ordered collection of sessions, in accept order
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: RwLock<Vec<Arc<Session>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn add(&self, session: Arc<Session>) {
        self.sessions.write().await.push(session);
    }

    /// Remove a session by id. Removing an absent id is a no-op.
    pub(crate) async fn remove(&self, id: Uuid) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let index = sessions.iter().position(|s| s.id() == id)?;
        Some(sessions.remove(index))
    }

    /// Copy of the current session list, in registry order
    pub(crate) async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.clone()
    }

    pub(crate) async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub(crate) async fn info(&self) -> Vec<SessionInfo> {
        let sessions = self.snapshot().await;
        let mut info = Vec::with_capacity(sessions.len());
        for session in sessions {
            info.push(session.info().await);
        }
        info
    }
}
