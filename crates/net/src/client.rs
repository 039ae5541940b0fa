//! TCP client for connecting to a relay server
//!
//! `start()` connects and spawns one receive task. Every packet the task
//! reads is handed to the registered `PacketHandler` on that task, so a
//! slow handler delays the packets behind it. Handlers must not block
//! indefinitely.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{resolve, ClientConfig};
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::packet::Packet;
use crate::state::{advance, ConnectionState};

/// Receives every packet the relay delivers to a client
pub trait PacketHandler: Send + Sync + 'static {
    fn handle(&self, packet: Packet);
}

impl<F> PacketHandler for F
where
    F: Fn(Packet) + Send + Sync + 'static,
{
    fn handle(&self, packet: Packet) {
        self(packet)
    }
}

/// Relay client handle
pub struct Client {
    config: ClientConfig,
    handler: Arc<dyn PacketHandler>,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<String>>,
}

impl Client {
    /// Create a disconnected client
    pub fn new(config: ClientConfig, handler: impl PacketHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            receive_task: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the relay and start the receive task
    pub async fn start(&self) -> Result<()> {
        if !advance(&self.state, ConnectionState::Connecting).await {
            return Err(Error::AlreadyRunning);
        }

        let addr = self.config.addr_string();
        info!(addr = %addr, emitter = %self.config.emitter, "Connecting to server");

        let stream = match connect(&self.config).await {
            Ok(stream) => stream,
            Err(source) => {
                warn!(addr = %addr, error = %source, "Connect failed");
                *self.last_error.lock().await = Some(source.to_string());
                advance(&self.state, ConnectionState::Disconnected).await;
                return Err(Error::Connect { addr, source });
            }
        };

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        *self.last_error.lock().await = None;
        advance(&self.state, ConnectionState::Connected).await;

        let task = tokio::spawn(receive_loop(
            reader,
            self.writer.clone(),
            self.handler.clone(),
            self.state.clone(),
            self.config.max_frame_size,
        ));
        *self.receive_task.lock().await = Some(task);

        info!(addr = %addr, "Connected to server");
        Ok(())
    }

    /// Build a packet stamped with this client's emitter
    pub fn packet(&self, identifier: impl Into<String>) -> Packet {
        Packet::new(identifier).emitted_by(self.config.emitter.clone())
    }

    /// Send a packet to the relay
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;
        write_frame(writer, packet, self.config.max_frame_size).await
    }

    /// Tell the relay this client is leaving, then close the connection.
    /// No acknowledgement is awaited. Calling it again does nothing.
    pub async fn stop(&self) {
        if self.connection_state().await == ConnectionState::Connected {
            let quit = Packet::termination(self.config.emitter.clone());
            if let Err(e) = self.send(&quit).await {
                debug!(error = %e, "Failed to send termination");
            }
        }

        if !advance(&self.state, ConnectionState::Closing).await {
            // Already closing or closed by the server; still release the
            // socket and the receive task.
            self.release().await;
            return;
        }

        self.release().await;
        advance(&self.state, ConnectionState::Closed).await;
        info!("Disconnected from server");
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Message of the last failed connect attempt
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    /// Shut down the socket and end the receive task
    async fn release(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Shutdown failed");
            }
        }

        if let Some(task) = self.receive_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn connect(config: &ClientConfig) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for addr in resolve(&config.host, config.port, config.family).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address")
    }))
}

/// Receive task: read packets until the connection closes or a frame
/// fails to decode, then shut the connection down
async fn receive_loop(
    mut reader: OwnedReadHalf,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    handler: Arc<dyn PacketHandler>,
    state: Arc<RwLock<ConnectionState>>,
    max_frame_size: usize,
) {
    loop {
        match read_frame(&mut reader, max_frame_size).await {
            Ok(packet) => {
                debug!(
                    identifier = %packet.identifier(),
                    emitter = %packet.emitter(),
                    "Received packet"
                );
                handler.handle(packet);
            }
            Err(Error::ConnectionClosed) => {
                debug!("Server closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }

    // Further sends are refused
    if advance(&state, ConnectionState::Closed).await {
        info!("Connection to server closed");
    }

    // Dropping only the read half leaves the socket open
    if let Some(mut writer) = writer.lock().await.take() {
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Shutdown failed");
        }
    }
}
