//! Length-prefixed frame encoding/decoding
//!
//! Wire format: [4-byte big-endian length][JSON-encoded packet]
//! The size limit is per-connection configuration.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::packet::Packet;

/// Default maximum frame size (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Read a length-prefixed frame from a stream
///
/// `read_exact` keeps reading across partial reads, so no packet is
/// produced until the whole body has arrived.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Packet> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(Error::from_stream)?;

    let len = u32::from_be_bytes(len_buf) as usize;

    // Sanity check
    if len == 0 {
        return Err(Error::Decode("Empty frame".into()));
    }
    if len > max_frame_size {
        return Err(Error::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }

    // Read payload
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(Error::from_stream)?;

    Packet::from_bytes(&payload).map_err(|e| Error::Decode(format!("Invalid packet: {}", e)))
}

/// Write a length-prefixed frame to a stream
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
    max_frame_size: usize,
) -> Result<()> {
    let payload = encode_frame(packet, max_frame_size)?;

    writer
        .write_all(&payload)
        .await
        .map_err(Error::from_stream)?;

    // Flush to ensure delivery
    writer.flush().await.map_err(Error::from_stream)?;

    Ok(())
}

/// Encode a packet into a complete frame, prefix included
pub fn encode_frame(packet: &Packet, max_frame_size: usize) -> Result<Vec<u8>> {
    let payload = packet
        .to_bytes()
        .map_err(|e| Error::Encode(format!("Serialization failed: {}", e)))?;

    let len = payload.len();
    if len > max_frame_size || len > u32::MAX as usize {
        return Err(Error::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }

    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}
