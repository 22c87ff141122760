//! # sync-types
//!
//! Data model and wire format for shelf-sync, LAN device pairing and
//! library sync between two reading-app installations.
//!
//! This crate provides the foundational types used across all shelf-sync crates:
//! - [`DeviceId`], [`SessionId`], [`Fingerprint`] - Identity types
//! - [`DeviceInfo`], [`PairedDevice`], [`TrustRecord`] - Devices and trust
//! - [`SyncableBook`], [`Manifest`], [`SyncConflict`] - Library data
//! - [`SyncSession`], [`SyncProgress`] - Session state and its projection
//! - [`Frame`], [`Message`] - Length-prefixed wire protocol
//! - [`SyncError`], [`SyncErrorKind`] - Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod device;
mod error;
mod frame;
mod ids;
mod library;
mod messages;
mod session;

pub use device::{DeviceInfo, DeviceType, PairedDevice, PairingSecret, PairingStatus, TrustRecord};
pub use error::{ErrorReport, SyncError, SyncErrorKind};
pub use frame::{Frame, FrameHeader, FrameType, FRAME_HEADER_LEN, MAX_FRAME_SIZE};
pub use ids::{DeviceId, Fingerprint, SessionId};
pub use library::{Manifest, ManifestItem, SyncConflict, SyncItemType, SyncableBook, SyncableChapter};
pub use messages::{
    Announce, BatchAck, BatchCommit, Bye, Challenge, ChallengeResponse, Fetch, ItemAck,
    ItemPayload, Message, PairRequest, PairResponse,
};
pub use session::{MemoryUsage, SyncProgress, SyncSession, SyncStatus};

/// Wire protocol version carried in announcements and pairing requests.
pub const PROTOCOL_VERSION: u8 = 1;
