//! In-process announcer for tests.

use super::Announcer;
use crate::transport::TransportError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use sync_types::Announce;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Records outgoing announcements and replays injected ones.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct MockAnnouncer {
    inner: Arc<Mutex<MockInner>>,
    inbound_tx: mpsc::UnboundedSender<Announce>,
    inbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Announce>>>,
}

#[derive(Debug, Default)]
struct MockInner {
    announced: Vec<Announce>,
    failing_announces: u32,
}

impl MockAnnouncer {
    /// Create an empty mock.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::default(),
            inbound_tx,
            inbound_rx: Arc::new(AsyncMutex::new(inbound_rx)),
        }
    }

    /// Deliver `announce` to the next `receive()`.
    pub fn inject(&self, announce: Announce) {
        let _ = self.inbound_tx.send(announce);
    }

    /// Announcements sent so far.
    pub fn announced(&self) -> Vec<Announce> {
        self.lock().announced.clone()
    }

    /// Make the next `count` announces fail.
    pub fn fail_next_announces(&self, count: u32) {
        self.lock().failing_announces = count;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockAnnouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Announcer for MockAnnouncer {
    async fn announce(&self, announce: &Announce) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.failing_announces > 0 {
            inner.failing_announces -= 1;
            return Err(TransportError::SendFailed("network unreachable".into()));
        }
        inner.announced.push(announce.clone());
        Ok(())
    }

    async fn receive(&self) -> Result<Announce, TransportError> {
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }
}
