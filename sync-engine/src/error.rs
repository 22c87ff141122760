//! Error types for sync-engine.
//!
//! Internal layers use their own error enums; everything converts into
//! [`SyncError`] at the public boundary so callers see one taxonomy.

use std::path::PathBuf;
use sync_types::SyncError;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::transport::TransportError;

/// Main error type for engine plumbing (responder loop, CLI wiring).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Sync protocol error.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Trust storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt trust record for {device_id}: {reason}")]
    Corrupt {
        /// Device the row belongs to.
        device_id: String,
        /// What was wrong.
        reason: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => SyncError::InvalidData(err.to_string()),
            other => SyncError::SecurityViolation(other.to_string()),
        }
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::InvalidData(err.to_string())
    }
}

impl From<EngineError> for SyncError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(e) => e.into(),
            EngineError::Storage(e) => e.into(),
            EngineError::Transport(e) => e.into(),
            EngineError::Crypto(e) => e.into(),
            EngineError::Sync(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::SyncErrorKind;

    #[test]
    fn storage_errors_map_to_storage_kind() {
        let err = StorageError::Corrupt {
            device_id: "d".into(),
            reason: "bad fingerprint".into(),
        };
        assert_eq!(SyncError::from(err).kind(), SyncErrorKind::Storage);
    }

    #[test]
    fn engine_errors_keep_their_kind() {
        let err: EngineError = TransportError::ConnectionClosed.into();
        assert_eq!(SyncError::from(err).kind(), SyncErrorKind::NetworkError);

        let err: EngineError = SyncError::NotPaired("x".into()).into();
        assert_eq!(SyncError::from(err).kind(), SyncErrorKind::NotPaired);
    }

    #[test]
    fn bad_ciphertext_is_invalid_data() {
        let err = SyncError::from(CryptoError::DecryptionFailed);
        assert_eq!(err.kind(), SyncErrorKind::InvalidData);
    }
}
