//! Transport abstraction for shelf-sync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (TCP on the LAN, in-process pairs
//! and a scripted mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented and moves whole
//! encoded frames (`u32` big-endian length, type byte, MessagePack
//! payload):
//! - `connect()` establishes a connection
//! - `send()` transmits one encoded frame
//! - `recv()` receives one encoded frame
//! - `close()` gracefully terminates
//!
//! [`send_message`] and [`recv_message`] layer [`Message`] framing on top.

mod memory;
mod mock;
mod tcp;

pub use memory::MemoryTransport;
pub use mock::MockTransport;
pub use tcp::{TcpTransport, TransportListener};

use async_trait::async_trait;
use sync_types::{Frame, Message, SyncError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,

    /// The bytes on the wire are not a valid frame or message.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] SyncError),
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => SyncError::timeout("transport"),
            TransportError::InvalidFrame(inner) => SyncError::Protocol(inner.to_string()),
            other => SyncError::Network(other.to_string()),
        }
    }
}

/// Transport trait for exchanging frames with one peer.
///
/// Implementations handle the underlying connection mechanism.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Connect to the peer at `address` (`ip:port` for TCP).
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one encoded frame.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive one encoded frame.
    ///
    /// Blocks until a frame is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Frame and send one message.
pub async fn send_message<T>(transport: &T, message: &Message) -> Result<(), TransportError>
where
    T: PeerTransport + ?Sized,
{
    let bytes = Frame::from_message(message)?.encode()?;
    transport.send(&bytes).await
}

/// Receive and decode one message.
pub async fn recv_message<T>(transport: &T) -> Result<Message, TransportError>
where
    T: PeerTransport + ?Sized,
{
    let bytes = transport.recv().await?;
    Ok(Frame::decode(&bytes)?.into_message()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::Bye;

    #[tokio::test]
    async fn messages_travel_as_frames() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();

        let bye = Message::Bye(Bye {
            reason: Some("done".into()),
        });
        send_message(&transport, &bye).await.unwrap();

        let sent = transport.last_sent().unwrap();
        let frame = Frame::decode(&sent).unwrap();
        assert_eq!(frame.into_message().unwrap(), bye);
    }

    #[tokio::test]
    async fn garbage_is_an_invalid_frame() {
        let transport = MockTransport::new();
        transport.connect("peer").await.unwrap();
        transport.queue_response(vec![0, 0]);
        let err = recv_message(&transport).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidFrame(_)));
        assert!(matches!(SyncError::from(err), SyncError::Protocol(_)));
    }

    #[test]
    fn closed_connection_is_a_network_error() {
        let err = SyncError::from(TransportError::ConnectionClosed);
        assert_eq!(err.kind(), sync_types::SyncErrorKind::NetworkError);
    }
}
