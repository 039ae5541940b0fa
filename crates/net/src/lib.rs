//! Relay Network Library
//!
//! A minimal packet relay over TCP.
//!
//! # Architecture
//!
//! - **Server**: accepts connections and broadcasts every packet a client
//!   sends to all other connected clients
//! - **Session**: the server's per-connection receive task
//! - **Client**: connects to a server, sends packets, and hands received
//!   packets to a handler
//! - **Protocol**: length-prefixed JSON packets `[identifier, emitter, data]`
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(ServerConfig::new("0.0.0.0", DEFAULT_PORT)).await?;
//!
//! let client = Client::new(ClientConfig::default().with_emitter("alice"), |packet: Packet| {
//!     println!("{}: {:?}", packet.emitter(), packet.data());
//! });
//! client.start().await?;
//! client.send(&client.packet("chat").with("msg", "hi")).await?;
//! client.stop().await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod packet;
mod registry;
pub mod server;
pub mod session;
pub mod state;

pub use client::{Client, PacketHandler};
pub use config::{AddressFamily, ClientConfig, Config, ServerConfig};
pub use error::{Error, Result};
pub use packet::{Packet, PacketData, TERMINATION_IDENTIFIER};
pub use server::Server;
pub use session::SessionInfo;
pub use state::{ConnectionState, ServerState};

/// Default port for relay servers
pub const DEFAULT_PORT: u16 = 25566;
