//! # sync-core
//!
//! Pure logic for shelf-sync (no I/O, instant tests).
//!
//! This crate holds the state machines and algorithms of device pairing
//! and library transfer without any network or disk I/O:
//!
//! - [`backoff`]: capped exponential retry delays
//! - [`pairing`]: PIN handling and the pairing handshake state machine
//! - [`manifest`]: manifest diffing and conflict detection
//! - [`resume`]: transfer plans and the resume cursor
//! - [`batch`]: batch grouping and `batch_count`
//! - [`progress`]: progress percentages and buffered-memory statistics
//! - [`session`]: the sync session state machine
//!
//! The actual I/O is performed by `sync-engine`, which interprets the
//! actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod batch;
pub mod manifest;
pub mod pairing;
pub mod progress;
pub mod resume;
pub mod session;

pub use backoff::{Backoff, RetryTelemetry, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};
pub use batch::{BatchError, BatchReady, BatchTracker};
pub use manifest::{diff_manifests, resolve_latest_wins, ManifestDiff, Resolution};
pub use pairing::{
    constant_time_eq, PairingEvent, PairingState, Pin, PinError, RejectReason,
    DEFAULT_PIN_LENGTH, MAX_PIN_LENGTH, MIN_PIN_LENGTH,
};
pub use progress::{percentage, MemoryTracker, ProgressTracker};
pub use resume::{Direction, PlannedItem, ResumeCursor, ResumePoint, TransferPlan};
pub use session::{SessionAction, SessionEvent, SessionState};
