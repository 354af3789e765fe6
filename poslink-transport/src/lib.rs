//! Transport layer for POS terminals
//!
//! A transport opens a [`Link`]: a writer half used by the command path and a
//! reader half owned by the read loop. Both halves deal in whole frames; any
//! stream framing is the transport's business.

pub mod error;
pub mod memory;
pub mod tcp;

pub use error::{Error, Result};
pub use memory::{MemoryAcceptor, MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::debug;

/// Transport trait for different communication methods
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new link to the terminal
    async fn open(&mut self) -> Result<Link>;

    /// Get remote address
    fn remote_addr(&self) -> String;
}

/// Write half of an open link
#[async_trait]
pub trait LinkWriter: Send + Sync {
    /// Send one encoded frame
    async fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Close the link; further writes fail
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an open link
#[async_trait]
pub trait LinkReader: Send {
    /// Wait for the next complete frame
    async fn read_frame(&mut self) -> Result<BytesMut>;
}

/// An open link
pub struct Link {
    pub writer: Box<dyn LinkWriter>,
    pub reader: Box<dyn LinkReader>,
}

impl Link {
    pub fn new(writer: Box<dyn LinkWriter>, reader: Box<dyn LinkReader>) -> Self {
        Self { writer, reader }
    }
}

/// Feed every incoming frame to `on_frame` until the link fails
///
/// Returns the error that ended the loop (`ConnectionClosed` on a clean EOF).
pub async fn read_loop<F>(mut reader: Box<dyn LinkReader>, mut on_frame: F) -> Error
where
    F: FnMut(BytesMut) + Send,
{
    loop {
        match reader.read_frame().await {
            Ok(frame) => on_frame(frame),
            Err(e) => {
                debug!("Read loop ended: {}", e);
                return e;
            }
        }
    }
}
