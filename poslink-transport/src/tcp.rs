//! TCP transport
//!
//! Frames are wrapped for the byte stream:
//!
//! ```text
//! 0x5050 (u16 LE) | 0x8272 (u16 LE) | length (u32 LE) | frame
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use poslink_core::constants::{STREAM_MAGIC_1, STREAM_MAGIC_2};
use poslink_core::MAX_FRAME_SIZE;

use crate::{error::*, Link, LinkReader, LinkWriter, Transport};

const WRAPPER_SIZE: usize = 8;

/// TCP transport for terminals reachable through a network bridge
pub struct TcpTransport {
    addr: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create new TCP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<Link> {
        let addr_str = format!("{}:{}", self.addr, self.port);

        let addr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))?;

        debug!("Connecting to {}...", addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::Io)?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);

        let (read_half, write_half) = stream.into_split();

        Ok(Link::new(
            Box::new(TcpLinkWriter {
                stream: Some(write_half),
            }),
            Box::new(TcpLinkReader {
                stream: read_half,
                buf: BytesMut::with_capacity(1024),
            }),
        ))
    }

    fn remote_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

struct TcpLinkWriter {
    stream: Option<OwnedWriteHalf>,
}

#[async_trait]
impl LinkWriter for TcpLinkWriter {
    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let mut buf = BytesMut::with_capacity(WRAPPER_SIZE + frame.len());
        wrap_frame(frame, &mut buf)?;

        trace!("Sending {} bytes: {:02X?}", buf.len(), &buf[..buf.len().min(16)]);

        stream.write_all(&buf).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // Graceful shutdown
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

struct TcpLinkReader {
    stream: OwnedReadHalf,
    buf: BytesMut,
}

#[async_trait]
impl LinkReader for TcpLinkReader {
    async fn read_frame(&mut self) -> Result<BytesMut> {
        loop {
            if let Some(frame) = unwrap_frame(&mut self.buf)? {
                trace!("Received frame of {} bytes", frame.len());
                return Ok(frame);
            }

            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

/// Append the stream wrapper and `frame` to `dst`
pub fn wrap_frame(frame: &[u8], dst: &mut BytesMut) -> Result<()> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    dst.put_u16_le(STREAM_MAGIC_1);
    dst.put_u16_le(STREAM_MAGIC_2);
    dst.put_u32_le(frame.len() as u32);
    dst.put_slice(frame);
    Ok(())
}

/// Split one complete frame off the front of `src`, if one is buffered
pub fn unwrap_frame(src: &mut BytesMut) -> Result<Option<BytesMut>> {
    if src.len() < WRAPPER_SIZE {
        return Ok(None);
    }

    let magic_1 = u16::from_le_bytes([src[0], src[1]]);
    let magic_2 = u16::from_le_bytes([src[2], src[3]]);
    if magic_1 != STREAM_MAGIC_1 || magic_2 != STREAM_MAGIC_2 {
        return Err(Error::BadMagic(((magic_1 as u32) << 16) | magic_2 as u32));
    }

    let len = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if src.len() < WRAPPER_SIZE + len {
        return Ok(None);
    }

    src.advance(WRAPPER_SIZE);
    Ok(Some(src.split_to(len)))
}
