//! Scripted transport for testing.
//!
//! Frames queued with [`MockTransport::queue_message`] are handed out by
//! `recv()` in order; everything sent is captured for inspection. Each
//! operation can be made to fail once.

use super::{PeerTransport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use sync_types::{Frame, Message};

/// Scripted transport.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Debug, Default)]
struct MockInner {
    connected: bool,
    connected_address: Option<String>,
    sent: Vec<Vec<u8>>,
    script: VecDeque<Vec<u8>>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a disconnected mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw frame bytes for `recv()`.
    pub fn queue_response(&self, frame: Vec<u8>) {
        self.lock().script.push_back(frame);
    }

    /// Queue a message for `recv()`.
    ///
    /// Messages too large for a frame are dropped.
    pub fn queue_message(&self, message: &Message) {
        if let Ok(bytes) = Frame::from_message(message).and_then(|f| f.encode()) {
            self.queue_response(bytes);
        }
    }

    /// Raw frames sent so far.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Last raw frame sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent.last().cloned()
    }

    /// Sent frames decoded back into messages; undecodable frames are skipped.
    pub fn sent_decoded(&self) -> Vec<Message> {
        self.sent_messages()
            .iter()
            .filter_map(|bytes| Frame::decode(bytes).ok()?.into_message().ok())
            .collect()
    }

    /// Address passed to the last successful `connect()`.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Make the next `connect()` fail.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Make the next `send()` fail.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Make the next `recv()` fail.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        // A poisoned mock only happens after a panicking test thread.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        inner.sent.push(frame.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_recv.take() {
            return Err(TransportError::ReceiveFailed(error));
        }
        inner
            .script
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}
