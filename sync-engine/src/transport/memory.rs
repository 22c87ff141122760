//! In-process transport pair.
//!
//! Two connected endpoints backed by tokio channels. Used to run an
//! engine against a [`PeerResponder`](crate::PeerResponder) without
//! sockets.

use super::{PeerTransport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};

/// One end of an in-process duplex connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Create two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            connected: AtomicBool::new(true),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.tx.lock().ok().and_then(|tx| tx.clone())
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn connect(&self, _address: &str) -> Result<(), TransportError> {
        match self.sender() {
            Some(tx) if !tx.is_closed() => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(TransportError::ConnectionFailed("peer endpoint dropped".into())),
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let tx = self.sender().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame.to_vec())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        Ok(())
    }
}
