//! Direct-TCP framing (port 445).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::TransportError;
use crate::{FrameRead, FrameWrite};

/// Default direct-TCP port for SMB2.
pub const DEFAULT_PORT: u16 = 445;

/// Largest payload the 24-bit direct-TCP length prefix can describe.
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Receive half of a length-prefixed frame stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R) -> FrameReader<R> {
        FrameReader { inner }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameRead for FrameReader<R> {
    async fn read_size(&mut self) -> Result<usize, TransportError> {
        let mut prefix = [0u8; 4];
        match self.inner.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Closed);
            }
            Err(e) => return Err(e.into()),
        }
        let size = u32::from_be_bytes(prefix) as usize;
        if size > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(size));
        }
        log::trace!("frame of {size} bytes inbound");
        Ok(size)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TransportError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Send half of a length-prefixed frame stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> FrameWriter<W> {
        FrameWriter { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameWrite for FrameWriter<W> {
    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if buf.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(buf.len()));
        }
        log::trace!("frame of {} bytes outbound", buf.len());
        self.inner
            .write_all(&(buf.len() as u32).to_be_bytes())
            .await?;
        self.inner.write_all(buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// TCP transport constructor; yields the split framer pair the connection
/// core consumes.
pub struct TcpTransport;

impl TcpTransport {
    pub async fn connect(
        addr: impl ToSocketAddrs,
    ) -> Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>), TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok((FrameReader::new(read), FrameWriter::new(write)))
    }
}
