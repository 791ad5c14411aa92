//! Framed byte-stream transports for SMB2.
//!
//! The connection core consumes frames through the [`FrameRead`] /
//! [`FrameWrite`] pair: a 4-byte big-endian length prefix (the direct-TCP
//! framing on port 445) followed by exactly that many payload bytes. The
//! framers are generic over any async byte stream, so tests can run them
//! over in-memory duplex pipes.

#![forbid(unsafe_code)]

pub mod error;
pub mod tcp;

pub use error::TransportError;
pub use tcp::{FrameReader, FrameWriter, TcpTransport, DEFAULT_PORT, MAX_FRAME_SIZE};

use async_trait::async_trait;

/// Receive half of a framed transport.
#[async_trait]
pub trait FrameRead: Send {
    /// Reads the length prefix of the next frame and returns the payload
    /// length.
    async fn read_size(&mut self) -> Result<usize, TransportError>;

    /// Fills `buf` exactly with frame payload bytes.
    async fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;
}

/// Send half of a framed transport.
#[async_trait]
pub trait FrameWrite: Send {
    /// Writes one frame: the length prefix followed by all of `buf`.
    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    /// Shuts down the write side of the stream.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}
