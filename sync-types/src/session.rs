//! Sync sessions and the progress projection.

use serde::{Deserialize, Serialize};

use crate::{DeviceId, ErrorReport, SessionId, SyncConflict};

/// Lifecycle status of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncStatus {
    /// No session running.
    #[default]
    Idle,
    /// Exchanging and diffing manifests.
    Preparing,
    /// Moving items.
    Transferring,
    /// Every item transferred.
    Completed,
    /// Ran to the end but some items failed permanently.
    CompletedWithErrors,
    /// Aborted by a session-level error.
    Failed,
    /// Stopped at the caller's request.
    Cancelled,
}

impl SyncStatus {
    /// Whether the session has finished.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed | Self::Cancelled
        )
    }
}

/// Peak and average of buffered payload bytes over a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Largest number of bytes buffered at once.
    pub peak_bytes: u64,
    /// Mean of all samples.
    pub average_bytes: u64,
    /// Number of samples taken.
    pub samples: u64,
}

/// A sync session with one peer.
///
/// Mutated only by the transfer engine; immutable once terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Session id.
    pub id: SessionId,
    /// Peer.
    pub device_id: DeviceId,
    /// Status.
    pub status: SyncStatus,
    /// Items scheduled for transfer (send + receive).
    pub total_items: u32,
    /// Items transferred successfully.
    pub completed_items: u32,
    /// Items that exhausted their retry budget.
    pub failed_items: u32,
    /// Items excluded from transfer because both sides diverged.
    pub conflicts: Vec<SyncConflict>,
    /// Ids we push to the peer.
    pub items_to_send: Vec<String>,
    /// Ids we pull from the peer.
    pub items_to_receive: Vec<String>,
    /// Item-level retries performed.
    pub retry_count: u32,
    /// Whether this session continued an interrupted one.
    pub was_resumed: bool,
    /// Index of the first item processed after resuming.
    pub resumed_from_item: Option<u32>,
    /// Whether item payloads were encrypted on the wire.
    pub was_encrypted: bool,
    /// Completed multiples of the batch size.
    pub batch_count: u32,
    /// Payload bytes moved in either direction.
    pub bytes_transferred: u64,
    /// Buffered payload memory.
    pub memory: MemoryUsage,
    /// Epoch milliseconds when the session started.
    pub start_time: u64,
    /// Epoch milliseconds when it reached a terminal status.
    pub completion_time: Option<u64>,
    /// Why the session failed, if it did.
    pub error: Option<ErrorReport>,
}

impl SyncSession {
    /// A fresh session in the `Idle` state.
    pub fn new(device_id: DeviceId, start_time: u64) -> Self {
        Self {
            id: SessionId::for_device(&device_id),
            device_id,
            status: SyncStatus::Idle,
            total_items: 0,
            completed_items: 0,
            failed_items: 0,
            conflicts: Vec::new(),
            items_to_send: Vec::new(),
            items_to_receive: Vec::new(),
            retry_count: 0,
            was_resumed: false,
            resumed_from_item: None,
            was_encrypted: false,
            batch_count: 0,
            bytes_transferred: 0,
            memory: MemoryUsage::default(),
            start_time,
            completion_time: None,
            error: None,
        }
    }

    /// Wall-clock duration, once finished.
    pub fn duration_ms(&self) -> Option<u64> {
        self.completion_time
            .map(|end| end.saturating_sub(self.start_time))
    }
}

/// Read-only projection of a session, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Peer.
    pub device_id: DeviceId,
    /// Session status.
    pub status: SyncStatus,
    /// Items scheduled.
    pub total_items: u32,
    /// Items done.
    pub completed_items: u32,
    /// `floor(completed * 100 / total)`, or 100 once finished.
    pub progress_percentage: u8,
    /// Item most recently transferred.
    pub current_item: Option<String>,
    /// Failure details for `Failed` sessions.
    pub error: Option<ErrorReport>,
}

impl SyncProgress {
    /// Progress for a peer with no session yet.
    pub fn idle(device_id: DeviceId) -> Self {
        Self {
            device_id,
            status: SyncStatus::Idle,
            total_items: 0,
            completed_items: 0,
            progress_percentage: 0,
            current_item: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::CompletedWithErrors.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
        assert!(!SyncStatus::Transferring.is_terminal());
        assert!(!SyncStatus::Idle.is_terminal());
    }

    #[test]
    fn new_session_uses_device_session_id() {
        let session = SyncSession::new(DeviceId::new("desk"), 10);
        assert_eq!(session.id.as_str(), "session-desk");
        assert_eq!(session.status, SyncStatus::Idle);
        assert!(session.duration_ms().is_none());
    }

    #[test]
    fn duration_after_completion() {
        let mut session = SyncSession::new(DeviceId::new("desk"), 1_000);
        session.completion_time = Some(1_250);
        assert_eq!(session.duration_ms(), Some(250));
    }
}
