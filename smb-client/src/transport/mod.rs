//! Direct TCP transport ([MS-SMB2] 2.1): each message is prefixed with a
//! 4-byte big-endian length whose top byte is zero.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use smb_client_core::error::SMBError;
use smb_client_core::logging::trace;
use smb_client_core::SMBResult;

use crate::protocol::message::Message;

/// Well-known direct TCP port.
pub const DIRECT_TCP_PORT: u16 = 445;

/// Largest frame accepted from the peer (8 MB).
const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

pub trait SMBReadStream: AsyncRead + Unpin + Send + 'static {}

impl<T: AsyncRead + Unpin + Send + 'static> SMBReadStream for T {}

pub trait SMBWriteStream: AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncWrite + Unpin + Send + 'static> SMBWriteStream for T {}

/// Opens a direct TCP connection and splits it into framed halves.
pub async fn connect(
    host: &str,
    port: u16,
) -> SMBResult<(SMBFrameReader<OwnedReadHalf>, SMBFrameWriter<OwnedWriteHalf>)> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(SMBError::io_error)?;
    let (read, write) = stream.into_split();
    Ok((SMBFrameReader::new(read), SMBFrameWriter::new(write)))
}

#[derive(Debug)]
pub struct SMBFrameReader<R: SMBReadStream> {
    stream: R,
}

impl<R: SMBReadStream> SMBFrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self { stream }
    }

    /// Reads one length-prefixed frame.
    pub async fn read_frame(&mut self) -> SMBResult<Vec<u8>> {
        let mut prefix = [0u8; 4];
        self.stream
            .read_exact(&mut prefix)
            .await
            .map_err(SMBError::io_error)?;
        if prefix[0] != 0 {
            return Err(SMBError::transport_error(format!(
                "unexpected stream protocol type {:#04x}",
                prefix[0]
            )));
        }
        let length = u32::from_be_bytes(prefix) & 0x00FF_FFFF;
        if length > MAX_FRAME_SIZE {
            return Err(SMBError::transport_error(format!(
                "frame of {} bytes exceeds the maximum",
                length
            )));
        }
        let mut payload = vec![0u8; length as usize];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(SMBError::io_error)?;
        trace!(frame_len = payload.len(), "frame received");
        Ok(payload)
    }
}

#[derive(Debug)]
pub struct SMBFrameWriter<W: SMBWriteStream> {
    stream: W,
}

impl<W: SMBWriteStream> SMBFrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    /// Writes one length-prefixed frame and flushes it. Returns the number of
    /// bytes put on the wire, prefix included.
    pub async fn write_frame(&mut self, data: &[u8]) -> SMBResult<usize> {
        if data.len() as u32 > MAX_FRAME_SIZE {
            return Err(SMBError::transport_error(format!(
                "frame of {} bytes exceeds the maximum",
                data.len()
            )));
        }
        let prefix = (data.len() as u32).to_be_bytes();
        self.stream
            .write_all(&prefix)
            .await
            .map_err(SMBError::io_error)?;
        self.stream
            .write_all(data)
            .await
            .map_err(SMBError::io_error)?;
        self.stream.flush().await.map_err(SMBError::io_error)?;
        Ok(4 + data.len())
    }

    pub async fn write_message<T: Message + Sync>(&mut self, message: &T) -> SMBResult<usize> {
        self.write_frame(&message.as_bytes()).await
    }

    pub async fn shutdown(&mut self) -> SMBResult<()> {
        self.stream.shutdown().await.map_err(SMBError::io_error)
    }
}
