//! Connection and server lifecycle states

use std::fmt;

use tokio::sync::RwLock;
use tracing::debug;

/// Connection state
///
/// Transitions only move forward, except `Connecting -> Disconnected`
/// when a connect attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        match (self, next) {
            (ConnectionState::Connecting, ConnectionState::Disconnected) => true,
            (from, to) => to > from,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Move a shared connection state to `next` if the transition is allowed.
/// Returns whether the state changed.
pub(crate) async fn advance(state: &RwLock<ConnectionState>, next: ConnectionState) -> bool {
    let mut current = state.write().await;
    if current.can_transition_to(next) {
        *current = next;
        true
    } else {
        debug!(from = %*current, to = %next, "Ignoring connection state transition");
        false
    }
}

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl ServerState {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: ServerState) -> bool {
        matches!(
            (self, next),
            (ServerState::Stopped, ServerState::Starting)
                | (ServerState::Starting, ServerState::Listening)
                | (ServerState::Starting, ServerState::Stopped)
                | (ServerState::Listening, ServerState::Stopping)
                | (ServerState::Stopping, ServerState::Stopped)
        )
    }
}
