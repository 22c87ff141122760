//! Identity types for shelf-sync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable identifier for a device on the local network.
///
/// Generated once per installation (UUID v4 text) and announced verbatim,
/// so any non-empty string received from a peer is accepted.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a DeviceId from an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random DeviceId.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never valid on the wire).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

/// Identifier of a sync session with one peer.
///
/// There is at most one active session per peer, so the id is derived
/// from the peer's device id.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// The session id used for syncing with `device_id`.
    pub fn for_device(device_id: &DeviceId) -> Self {
        Self(format!("session-{}", device_id))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// A pinned certificate fingerprint (`CERT-<hex sha256>`).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Prefix carried by every fingerprint derived from a certificate seed.
    pub const PREFIX: &'static str = "CERT-";

    /// Wrap an already computed fingerprint.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive the fingerprint of a certificate from its seed bytes.
    pub fn from_certificate(seed: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(seed);
        Self(format!("{}{}", Self::PREFIX, hex::encode(digest)))
    }

    /// Borrow the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the fingerprint is empty (never trusted).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to tell fingerprints apart in logs.
        let shown: String = self.0.chars().take(17).collect();
        write!(f, "Fingerprint({})", shown)
    }
}
