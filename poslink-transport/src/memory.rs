//! In-process transport
//!
//! Each `open` creates a fresh pair of frame channels and hands the terminal
//! side to the [`MemoryAcceptor`]. Used by tests and the device simulator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{error::*, Link, LinkReader, LinkWriter, Transport};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Host side of an in-memory link
pub struct MemoryTransport {
    name: String,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    accepting: Arc<AtomicBool>,
    capacity: usize,
}

/// Terminal side: receives one [`MemoryPeer`] per opened link
pub struct MemoryAcceptor {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    accepting: Arc<AtomicBool>,
}

/// Terminal end of one link
pub struct MemoryPeer {
    from_host: mpsc::Receiver<Bytes>,
    to_host: mpsc::Sender<Bytes>,
}

impl MemoryTransport {
    /// Create a connected transport / acceptor pair
    pub fn pair(name: impl Into<String>) -> (Self, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let accepting = Arc::new(AtomicBool::new(true));

        let transport = Self {
            name: name.into(),
            peers: tx,
            accepting: accepting.clone(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        };

        (
            transport,
            MemoryAcceptor {
                peers: rx,
                accepting,
            },
        )
    }

    /// Set per-direction channel capacity (in frames)
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&mut self) -> Result<Link> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::Unavailable(format!("{} is not accepting links", self.name)));
        }

        let (host_tx, device_rx) = mpsc::channel(self.capacity);
        let (device_tx, host_rx) = mpsc::channel(self.capacity);

        let peer = MemoryPeer {
            from_host: device_rx,
            to_host: device_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| Error::Unavailable(format!("{} has no acceptor", self.name)))?;

        debug!("Opened memory link to {}", self.name);

        Ok(Link::new(
            Box::new(MemoryLinkWriter { tx: Some(host_tx) }),
            Box::new(MemoryLinkReader { rx: host_rx }),
        ))
    }

    fn remote_addr(&self) -> String {
        format!("memory://{}", self.name)
    }
}

impl MemoryAcceptor {
    /// Wait for the host to open the next link
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Refuse (or accept again) future `open` calls
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    pub fn accepting_flag(&self) -> Arc<AtomicBool> {
        self.accepting.clone()
    }
}

impl MemoryPeer {
    /// Next frame written by the host, `None` once the host closed the link
    pub async fn recv(&mut self) -> Option<BytesMut> {
        self.from_host.recv().await.map(|b| BytesMut::from(&b[..]))
    }

    /// Push a frame to the host
    pub async fn send(&self, frame: impl Into<Bytes>) -> Result<()> {
        self.to_host
            .send(frame.into())
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

struct MemoryLinkWriter {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl LinkWriter for MemoryLinkWriter {
    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes over memory link", frame.len());

        tx.send(Bytes::copy_from_slice(frame))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

struct MemoryLinkReader {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl LinkReader for MemoryLinkReader {
    async fn read_frame(&mut self) -> Result<BytesMut> {
        match self.rx.recv().await {
            Some(frame) => Ok(BytesMut::from(&frame[..])),
            None => Err(Error::ConnectionClosed),
        }
    }
}
