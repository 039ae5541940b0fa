//! Server-side session, one per accepted connection
//!
//! The receive loop owns the read side of the socket. The write side sits
//! behind a mutex and is only used by the server's broadcast path.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{encode_frame, read_frame};
use crate::packet::Packet;
use crate::server::Relay;
use crate::state::{advance, ConnectionState};

type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Snapshot of a session for introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub peer_addr: SocketAddr,
    pub state: ConnectionState,
}

/// One connected client, as seen by the server
pub struct Session {
    id: Uuid,
    peer_addr: SocketAddr,
    state: RwLock<ConnectionState>,
    writer: Mutex<SessionWriter>,
    max_frame_size: usize,
}

impl Session {
    /// Wrap the write side of an accepted connection. The session starts
    /// out connected.
    pub(crate) fn new<W>(peer_addr: SocketAddr, writer: W, max_frame_size: usize) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            peer_addr,
            state: RwLock::new(ConnectionState::Connected),
            writer: Mutex::new(Box::new(writer)),
            max_frame_size,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub(crate) async fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            state: self.state().await,
        }
    }

    /// Frame and write a packet to this session's socket
    pub(crate) async fn send(&self, packet: &Packet) -> Result<()> {
        let frame = encode_frame(packet, self.max_frame_size)?;
        self.send_frame(&frame).await
    }

    /// Write an already encoded frame. Frames from concurrent callers
    /// never interleave.
    pub(crate) async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await.map_err(Error::from_stream)?;
        writer.flush().await.map_err(Error::from_stream)?;
        Ok(())
    }

    /// Stop accepting broadcasts and shut down the write side
    pub(crate) async fn close(&self) {
        if !advance(&self.state, ConnectionState::Closing).await {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(session_id = %self.id, error = %e, "Shutdown failed");
        }
        drop(writer);

        advance(&self.state, ConnectionState::Closed).await;
    }

    /// Receive loop. Runs until the peer closes, sends the termination
    /// packet, or sends something undecodable, then removes the session
    /// from the relay.
    pub(crate) async fn run<R>(self: Arc<Self>, mut reader: R, relay: Arc<Relay>)
    where
        R: AsyncRead + Unpin,
    {
        info!(session_id = %self.id, peer = %self.peer_addr, "Client connected");

        loop {
            match read_frame(&mut reader, self.max_frame_size).await {
                Ok(packet) if packet.is_termination() => {
                    debug!(session_id = %self.id, emitter = %packet.emitter(), "Termination received");
                    break;
                }
                Ok(packet) => {
                    debug!(
                        session_id = %self.id,
                        identifier = %packet.identifier(),
                        emitter = %packet.emitter(),
                        "Routing packet"
                    );
                    relay.broadcast_except(&packet, Some(self.id)).await;
                }
                Err(Error::ConnectionClosed) => {
                    debug!(session_id = %self.id, "Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Read error");
                    break;
                }
            }
        }

        self.close().await;
        relay.remove_session(self.id).await;

        info!(session_id = %self.id, peer = %self.peer_addr, "Client disconnected");
    }
}
