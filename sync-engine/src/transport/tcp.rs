//! TCP transport.
//!
//! Reads are framed with [`FrameHeader`]: five header bytes, then exactly
//! the announced payload length (bounded by `MAX_FRAME_SIZE`).

use super::{PeerTransport, TransportError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use sync_types::{FrameHeader, FRAME_HEADER_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::debug;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A framed TCP connection to one peer.
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a disconnected transport.
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a disconnected transport with a custom connect timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_timeout,
        }
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let transport = Self::new();
        transport.attach(stream);
        transport
    }

    fn attach(&self, stream: TcpStream) {
        // Frames are small and latency matters more than throughput.
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        if let (Ok(mut reader), Ok(mut writer)) = (self.reader.try_lock(), self.writer.try_lock())
        {
            *reader = Some(read);
            *writer = Some(write);
            self.connected.store(true, Ordering::SeqCst);
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(%address, "tcp connected");

        let (read, write) = stream.into_split();
        *self.reader.lock().await = Some(read);
        *self.writer.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let result = async {
            writer.write_all(frame).await?;
            writer.flush().await
        }
        .await;
        result.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        if let Err(e) = reader.read_exact(&mut header).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
                _ => TransportError::ReceiveFailed(e.to_string()),
            });
        }
        let parsed = FrameHeader::parse(&header)?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + parsed.len);
        frame.extend_from_slice(&header);
        frame.resize(FRAME_HEADER_LEN + parsed.len, 0);
        reader
            .read_exact(&mut frame[FRAME_HEADER_LEN..])
            .await
            .map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                TransportError::ReceiveFailed(e.to_string())
            })?;
        Ok(frame)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
        Ok(())
    }
}

/// Accepts incoming sync connections.
#[derive(Debug)]
pub struct TransportListener {
    listener: TcpListener,
}

impl TransportListener {
    /// Bind to `address` (`0.0.0.0:8963` for all interfaces).
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { listener })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }

    /// Wait for the next connection.
    pub async fn accept(&self) -> Result<(TcpTransport, SocketAddr), TransportError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(%peer, "tcp accepted");
        Ok((TcpTransport::from_stream(stream), peer))
    }
}
