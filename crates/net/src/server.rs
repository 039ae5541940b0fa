//! TCP relay server
//!
//! Accepts connections, runs one receive task per session, and broadcasts
//! every packet a session receives to all other connected sessions.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{resolve, ServerConfig};
use crate::error::{Error, Result};
use crate::frame::encode_frame;
use crate::packet::Packet;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionInfo};
use crate::state::ServerState;

/// Relay state shared by the accept loop and every session task
pub(crate) struct Relay {
    registry: SessionRegistry,
    max_frame_size: usize,
}

impl Relay {
    pub(crate) fn new(max_frame_size: usize) -> Self {
        Self {
            registry: SessionRegistry::new(),
            max_frame_size,
        }
    }

    pub(crate) async fn add_session(&self, session: Arc<Session>) {
        self.registry.add(session).await;
    }

    pub(crate) async fn remove_session(&self, id: Uuid) {
        if self.registry.remove(id).await.is_some() {
            debug!(session_id = %id, "Session removed");
        }
    }

    pub(crate) async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    /// Deliver a packet to every connected session except `except`, in
    /// registry order. A session whose send fails is closed and removed;
    /// delivery to the rest continues. Returns the number of sessions
    /// the packet was written to.
    pub(crate) async fn broadcast_except(&self, packet: &Packet, except: Option<Uuid>) -> usize {
        let frame = match encode_frame(packet, self.max_frame_size) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(identifier = %packet.identifier(), error = %e, "Packet not broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        for session in self.registry.snapshot().await {
            if Some(session.id()) == except {
                continue;
            }

            match session.send_frame(&frame).await {
                Ok(()) => delivered += 1,
                Err(Error::NotConnected) => {
                    debug!(session_id = %session.id(), "Skipping session that is not connected");
                }
                Err(e) => {
                    warn!(session_id = %session.id(), error = %e, "Send failed, dropping session");
                    session.close().await;
                    self.remove_session(session.id()).await;
                }
            }
        }

        debug!(identifier = %packet.identifier(), delivered, "Broadcast complete");
        delivered
    }

    async fn send_to(&self, id: Uuid, packet: &Packet) -> Result<()> {
        let session = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .find(|s| s.id() == id)
            .ok_or(Error::NotConnected)?;

        session.send(packet).await
    }
}

/// Relay server handle
///
/// Dropping the handle stops the accept loop, same as `stop()`.
pub struct Server {
    addr: SocketAddr,
    relay: Arc<Relay>,
    state: Arc<watch::Sender<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the configured address and start accepting connections
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let state = Arc::new(watch::channel(ServerState::Stopped).0);
        set_state(&state, ServerState::Starting);

        let listener = match bind(&config).await {
            Ok(listener) => listener,
            Err(e) => {
                set_state(&state, ServerState::Stopped);
                return Err(e);
            }
        };
        let bound_addr = listener.local_addr()?;

        let relay = Arc::new(Relay::new(config.max_frame_size));
        let (shutdown_tx, _) = broadcast::channel(1);

        set_state(&state, ServerState::Listening);
        info!(addr = %bound_addr, backlog = config.backlog, "Server started");

        // Spawn accept loop
        tokio::spawn(accept_loop(
            listener,
            relay.clone(),
            state.clone(),
            shutdown_tx.subscribe(),
        ));

        Ok(Server {
            addr: bound_addr,
            relay,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Push a server-originated packet to every connected session
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        self.relay.broadcast_except(packet, None).await
    }

    /// Send a packet to a single session
    pub async fn send_to(&self, session_id: Uuid, packet: &Packet) -> Result<()> {
        self.relay.send_to(session_id, packet).await
    }

    pub async fn session_count(&self) -> usize {
        self.relay.session_count().await
    }

    /// Live sessions, in accept order
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.relay.registry.info().await
    }

    /// Stop accepting new connections. Existing sessions keep running
    /// until their peers leave.
    pub fn stop(&self) {
        if self.shutdown_tx.send(()).is_ok() {
            info!("Server shutdown initiated");
        }
    }

    /// Wait until the accept loop has exited and released the listener
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ServerState::Stopped).await;
    }
}

fn set_state(state: &watch::Sender<ServerState>, next: ServerState) {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            debug!(from = ?*current, to = ?next, "Ignoring server state transition");
            false
        }
    });
}

async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.addr_string();
    let candidates = resolve(&config.host, config.port, config.family)
        .await
        .map_err(|source| Error::Bind {
            addr: addr.clone(),
            source,
        })?;

    let mut last_error = None;
    for candidate in candidates {
        match bind_socket(candidate, config.backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(addr = %candidate, error = %e, "Bind attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(Error::Bind {
        addr,
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address")),
    })
}

fn bind_socket(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Errors that only affect the connection being accepted
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Out of file descriptors. Existing connections may free some.
fn is_resource_exhausted(e: &io::Error) -> bool {
    const ENFILE: i32 = 23;
    const EMFILE: i32 = 24;
    e.kind() == io::ErrorKind::OutOfMemory
        || (cfg!(unix) && matches!(e.raw_os_error(), Some(ENFILE | EMFILE)))
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    relay: Arc<Relay>,
    state: Arc<watch::Sender<ServerState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        spawn_session(stream, addr, &relay).await;
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        debug!(error = %e, "Accept skipped");
                    }
                    Err(e) if is_resource_exhausted(&e) => {
                        warn!(error = %e, "Accept failed, backing off");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }

    set_state(&state, ServerState::Stopping);
    drop(listener);
    set_state(&state, ServerState::Stopped);
    info!("Server stopped");
}

/// Register a session for an accepted connection and start its receive task
async fn spawn_session(stream: TcpStream, addr: SocketAddr, relay: &Arc<Relay>) {
    let (reader, writer) = stream.into_split();
    let session = Arc::new(Session::new(addr, writer, relay.max_frame_size));

    relay.add_session(session.clone()).await;
    tokio::spawn(session.run(reader, relay.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
    use crate::state::ConnectionState;

    async fn connect(server: &Server) -> TcpStream {
        let expected = server.session_count().await + 1;
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_sessions(server, expected).await;
        stream
    }

    async fn wait_for_sessions(server: &Server, count: usize) {
        for _ in 0..200 {
            if server.session_count().await == count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected {} sessions", count);
    }

    #[tokio::test]
    async fn test_failed_send_removes_session() {
        let relay = Relay::new(DEFAULT_MAX_FRAME_SIZE);
        let peer: SocketAddr = ([127, 0, 0, 1], 5000).into();

        let (writer, remote) = tokio::io::duplex(1024);
        drop(remote);
        let dead = Arc::new(Session::new(peer, writer, DEFAULT_MAX_FRAME_SIZE));
        relay.add_session(dead.clone()).await;

        // No receive loop runs, so only the broadcast can remove it
        let delivered = relay.broadcast_except(&Packet::new("chat"), None).await;
        assert_eq!(delivered, 0);
        assert_eq!(relay.session_count().await, 0);
        assert_eq!(dead.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_stop_delivery() {
        let relay = Relay::new(DEFAULT_MAX_FRAME_SIZE);
        let peer: SocketAddr = ([127, 0, 0, 1], 5000).into();

        let (dead_writer, dead_remote) = tokio::io::duplex(1024);
        drop(dead_remote);
        let (live_writer, mut live_remote) = tokio::io::duplex(1024);
        relay
            .add_session(Arc::new(Session::new(peer, dead_writer, DEFAULT_MAX_FRAME_SIZE)))
            .await;
        relay
            .add_session(Arc::new(Session::new(peer, live_writer, DEFAULT_MAX_FRAME_SIZE)))
            .await;

        let packet = Packet::new("chat").with("msg", "hi");
        assert_eq!(relay.broadcast_except(&packet, None).await, 1);
        assert_eq!(relay.session_count().await, 1);
        assert_eq!(read_frame(&mut live_remote, DEFAULT_MAX_FRAME_SIZE).await.unwrap(), packet);
    }

    #[test]
    fn test_accept_error_classes() {
        assert!(is_transient_accept_error(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_transient_accept_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_resource_exhausted(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[cfg(unix)]
    #[test]
    fn test_fd_exhaustion_backs_off() {
        assert!(is_resource_exhausted(&io::Error::from_raw_os_error(24)));
        assert!(is_resource_exhausted(&io::Error::from_raw_os_error(23)));
    }

    #[tokio::test]
    async fn test_server_start() {
        let server = Server::start(ServerConfig::new("127.0.0.1", 0)).await.unwrap();

        assert!(server.local_addr().port() > 0);
        assert_eq!(server.state(), ServerState::Listening);

        server.stop();
        server.wait_stopped().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = Server::start(ServerConfig::new("127.0.0.1", 0)).await.unwrap();
        let port = first.local_addr().port();

        let result = Server::start(ServerConfig::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(Error::Bind { .. })));
    }

    #[tokio::test]
    async fn test_stop_keeps_existing_sessions() {
        let server = Server::start(ServerConfig::new("127.0.0.1", 0)).await.unwrap();
        let mut peer = connect(&server).await;

        server.stop();
        server.wait_stopped().await;

        // New connections are refused once the listener is gone
        assert!(TcpStream::connect(server.local_addr()).await.is_err());

        // The existing session still receives broadcasts
        let packet = Packet::new("notice").emitted_by("server");
        assert_eq!(server.broadcast(&packet).await, 1);
        let received = read_frame(&mut peer, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn test_send_to_single_session() {
        let server = Server::start(ServerConfig::new("127.0.0.1", 0)).await.unwrap();
        let mut peer = connect(&server).await;

        let id = server.sessions().await[0].id;
        let packet = Packet::new("direct").with("n", 1);
        server.send_to(id, &packet).await.unwrap();
        assert_eq!(read_frame(&mut peer, DEFAULT_MAX_FRAME_SIZE).await.unwrap(), packet);

        let missing = server.send_to(Uuid::new_v4(), &packet).await;
        assert!(matches!(missing, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_peer_close_removes_session() {
        let server = Server::start(ServerConfig::new("127.0.0.1", 0)).await.unwrap();
        let peer = connect(&server).await;

        drop(peer);
        wait_for_sessions(&server, 0).await;
    }

    #[tokio::test]
    async fn test_oversized_packet_not_broadcast() {
        let mut config = ServerConfig::new("127.0.0.1", 0);
        config.max_frame_size = 64;
        let server = Server::start(config).await.unwrap();
        let _peer = connect(&server).await;

        let packet = Packet::new("big").with("blob", "x".repeat(256));
        assert_eq!(server.broadcast(&packet).await, 0);
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_termination_not_broadcast() {
        let server = Server::start(ServerConfig::new("127.0.0.1", 0)).await.unwrap();
        let mut a = connect(&server).await;
        let mut b = connect(&server).await;

        write_frame(&mut a, &Packet::termination("A"), DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        wait_for_sessions(&server, 1).await;

        // Only b remains, and the next thing b sees is the server's notice
        let notice = Packet::new("notice");
        assert_eq!(server.broadcast(&notice).await, 1);
        assert_eq!(read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap(), notice);

        // a's session shut down its write side
        assert!(matches!(
            read_frame(&mut a, DEFAULT_MAX_FRAME_SIZE).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
