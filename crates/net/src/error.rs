//! Relay error types

use std::io;

/// Relay result type
pub type Result<T> = std::result::Result<T, Error>;

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already running")]
    AlreadyRunning,

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Map an I/O error from a socket read or write, folding the
    /// peer-went-away kinds into `ConnectionClosed`.
    pub(crate) fn from_stream(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }

    /// Whether this error means the frame could not be decoded
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::FrameTooLarge { .. })
    }
}
