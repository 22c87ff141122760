//! Error types for shelf-sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::DeviceId;

/// The error taxonomy surfaced to callers and to the progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorKind {
    /// An operation exceeded its time budget.
    Timeout,
    /// The presented PIN was wrong.
    AuthenticationFailed,
    /// Too many failed PIN attempts for this peer.
    TooManyAttempts,
    /// The peer presented a certificate different from the pinned one.
    CertificateMismatch,
    /// Trust for the peer lapsed since pairing.
    TrustExpired,
    /// The peer was never paired (or trust was revoked).
    NotPaired,
    /// The peer is flagged as a man-in-the-middle.
    SecurityViolation,
    /// The network failed underneath the operation.
    NetworkError,
    /// A session with the peer is already running.
    SessionInProgress,
    /// Malformed data from a peer or a collaborator.
    InvalidData,
    /// The local trust/library storage failed.
    Storage,
    /// The peer violated the wire protocol.
    Protocol,
}

impl SyncErrorKind {
    /// Security failures are never retried; they need explicit re-pairing.
    pub fn is_security(self) -> bool {
        matches!(self, Self::CertificateMismatch | Self::SecurityViolation)
    }

    /// Whether an automatic retry may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::NetworkError | Self::Timeout)
    }

    /// Short human-readable description of what went wrong.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Timeout => "The sync took too long and was stopped.",
            Self::AuthenticationFailed => "Device authentication failed.",
            Self::TooManyAttempts => "Too many incorrect PIN attempts.",
            Self::CertificateMismatch => {
                "The device's identity changed since it was paired."
            }
            Self::TrustExpired => "Trust with this device has expired.",
            Self::NotPaired => "This device is not paired.",
            Self::SecurityViolation => "The connection to this device is not secure.",
            Self::NetworkError => "Failed to connect to device.",
            Self::SessionInProgress => "A sync with this device is already running.",
            Self::InvalidData => "The device sent data that could not be read.",
            Self::Storage => "Local storage could not be updated.",
            Self::Protocol => "Data transfer failed.",
        }
    }

    /// Remediation hint shown next to [`user_message`](Self::user_message).
    pub fn suggestion(self) -> Option<&'static str> {
        match self {
            Self::Timeout | Self::NetworkError => {
                Some("Please ensure both devices are on the same network and try again.")
            }
            Self::AuthenticationFailed => Some("Check the PIN shown on the other device."),
            Self::TooManyAttempts => Some("Wait a moment, then restart pairing on both devices."),
            Self::CertificateMismatch | Self::SecurityViolation => {
                Some("Remove the device and pair it again.")
            }
            Self::TrustExpired | Self::NotPaired => Some("Please try pairing again."),
            Self::Storage => Some("Please free up some space and try again."),
            Self::InvalidData | Self::Protocol => {
                Some("Please update the app on both devices and try again.")
            }
            Self::SessionInProgress => None,
        }
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "TIMEOUT",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            Self::CertificateMismatch => "CERTIFICATE_MISMATCH",
            Self::TrustExpired => "TRUST_EXPIRED",
            Self::NotPaired => "NOT_PAIRED",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::NetworkError => "NETWORK_ERROR",
            Self::SessionInProgress => "SESSION_IN_PROGRESS",
            Self::InvalidData => "INVALID_DATA",
            Self::Storage => "STORAGE",
            Self::Protocol => "PROTOCOL",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in shelf-sync operations.
///
/// Cloneable so a failure can be published on the progress stream and
/// returned to the caller at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Operation timed out
    #[error("{operation} timed out")]
    Timeout {
        /// What was being waited on.
        operation: String,
    },

    /// Wrong PIN
    #[error("authentication failed for {device_id} (attempt {attempts})")]
    AuthenticationFailed {
        /// Peer being paired.
        device_id: DeviceId,
        /// Failed attempts so far, including this one.
        attempts: u32,
    },

    /// Attempt limit reached
    #[error("too many pairing attempts for {device_id} ({attempts})")]
    TooManyAttempts {
        /// Peer being paired.
        device_id: DeviceId,
        /// Failed attempts recorded.
        attempts: u32,
    },

    /// Pinned certificate differs from the presented one
    #[error("certificate mismatch for {device_id}")]
    CertificateMismatch {
        /// Peer whose certificate changed.
        device_id: DeviceId,
    },

    /// Trust lapsed
    #[error("trust expired for {0}")]
    TrustExpired(DeviceId),

    /// No trust on file
    #[error("device {0} is not paired")]
    NotPaired(DeviceId),

    /// Peer flagged as MITM or otherwise unsafe
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// Network failure
    #[error("network error: {0}")]
    Network(String),

    /// Only one session per peer
    #[error("a sync session with {0} is already in progress")]
    SessionInProgress(DeviceId),

    /// Malformed data
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// MessagePack encoding/decoding failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Unexpected message or framing error
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::Timeout { .. } => SyncErrorKind::Timeout,
            Self::AuthenticationFailed { .. } => SyncErrorKind::AuthenticationFailed,
            Self::TooManyAttempts { .. } => SyncErrorKind::TooManyAttempts,
            Self::CertificateMismatch { .. } => SyncErrorKind::CertificateMismatch,
            Self::TrustExpired(_) => SyncErrorKind::TrustExpired,
            Self::NotPaired(_) => SyncErrorKind::NotPaired,
            Self::SecurityViolation(_) => SyncErrorKind::SecurityViolation,
            Self::Network(_) => SyncErrorKind::NetworkError,
            Self::SessionInProgress(_) => SyncErrorKind::SessionInProgress,
            Self::InvalidData(_) => SyncErrorKind::InvalidData,
            Self::Storage(_) => SyncErrorKind::Storage,
            Self::Serialization(_) | Self::Protocol(_) => SyncErrorKind::Protocol,
        }
    }

    /// Convenience constructor for timeouts.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// The user-facing report for this error.
    pub fn report(&self) -> ErrorReport {
        let kind = self.kind();
        ErrorReport {
            kind,
            message: kind.user_message().to_string(),
            suggestion: kind.suggestion().map(str::to_string),
        }
    }
}

/// What the UI shows for a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error kind.
    pub kind: SyncErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional remediation hint.
    pub suggestion: Option<String>,
}
