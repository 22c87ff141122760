//! CLI command implementations.

pub mod discover;
pub mod init;
pub mod library;
pub mod pair;
pub mod serve;
pub mod sync;
pub mod trust;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Attach the remediation hint for `error`, if it has one.
pub(crate) fn explain(error: sync_types::SyncError) -> anyhow::Error {
    let suggestion = error.kind().suggestion();
    let error = anyhow::Error::new(error);
    match suggestion {
        Some(hint) => error.context(hint),
        None => error,
    }
}
