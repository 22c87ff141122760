//! # sync-engine
//!
//! LAN discovery, device pairing and library transfer for shelf-sync.
//!
//! ## Features
//!
//! - **Discovery**: periodic UDP announcements and a live peer list
//! - **Pairing**: PIN-authenticated handshake with certificate pinning and
//!   expiring trust (in memory or SQLite)
//! - **Transfer**: manifest diffing, batched item transfer with per-item
//!   retries, resume after interruption, gzip-compressed
//!   XChaCha20-Poly1305 payloads, per-session proof of the pairing secret
//! - **Host seams**: the library, foreground service, wake lock and
//!   resource monitor are traits the embedding application implements
//!
//! The decisions themselves (backoff, pairing and session state
//! machines, diffing, batching) live in `sync-core`; this crate performs
//! the I/O they ask for.
//!
//! ## Example
//!
//! ```ignore
//! use sync_engine::{MemoryLibrary, MemoryTrustStore, SyncEngine, TcpTransport};
//!
//! let engine = SyncEngine::new(identity, config.transfer, trust, library);
//! let session = engine.sync_with_device(&peer, &TcpTransport::new()).await?;
//! println!("{} items synced", session.completed_items);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod library;
pub mod pairing;
mod payload;
pub mod resource;
pub mod service;
pub mod transport;
pub mod trust;

mod engine;
mod responder;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, DiscoveryConfig, EngineConfig, PairingConfig, StorageConfig, TransferConfig,
};
pub use crypto::{CryptoError, PayloadKey, ProofParams, KEY_SIZE, NONCE_SIZE};
pub use discovery::{Announcer, DiscoveryService, DiscoveryStatus, MockAnnouncer, UdpAnnouncer};
pub use engine::SyncEngine;
pub use error::{EngineError, StorageError};
pub use identity::DeviceIdentity;
pub use library::{LocalLibrary, MemoryLibrary};
pub use pairing::{short_fingerprint, PairingCoordinator};
pub use payload::{decode_book, encode_book};
pub use resource::{
    NoopMonitor, NoopWakeLock, ResourceCoordinator, ResourceError, ResourceGuard,
    ResourceMonitor, ResourceReport, WakeLock,
};
pub use responder::{PeerResponder, ServeSummary};
pub use service::{NoopServiceController, ServiceController};
pub use transport::{
    MemoryTransport, MockTransport, PeerTransport, TcpTransport, TransportError,
    TransportListener,
};
pub use trust::{MemoryTrustStore, SqliteTrustStore, TrustStatus, TrustStore};
