//! Devices, pairing results and trust records.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{DeviceId, Fingerprint};

/// Kind of device running the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceType {
    /// Android phone or tablet.
    Android,
    /// iPhone or iPad.
    Ios,
    /// Desktop build.
    Desktop,
    /// Anything we could not classify.
    #[default]
    Unknown,
}

/// A device seen on the local network.
///
/// Purely descriptive; the most recent sighting of a device id wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable unique id.
    pub device_id: DeviceId,
    /// Human-readable name.
    pub device_name: String,
    /// Device kind.
    pub device_type: DeviceType,
    /// Application version string.
    pub app_version: String,
    /// Address the device accepts sync connections on.
    pub ip_address: IpAddr,
    /// Sync port.
    pub port: u16,
    /// Epoch milliseconds of the last announcement.
    pub last_seen: u64,
}

impl DeviceInfo {
    /// Socket address for opening a sync connection.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }

    /// Milliseconds since the last announcement, relative to `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen)
    }
}

/// Outcome status of a pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairingStatus {
    /// Handshake not finished yet.
    Pending,
    /// Handshake succeeded and trust is recorded.
    Paired,
    /// Handshake was refused.
    Rejected,
}

/// A device we completed a pairing handshake with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedDevice {
    /// The peer.
    pub device: DeviceInfo,
    /// Pairing status.
    pub status: PairingStatus,
    /// Certificate fingerprint pinned for the peer.
    pub certificate: Fingerprint,
    /// Whether the peer is currently trusted.
    pub is_trusted: bool,
}

/// Symmetric secret agreed during the PIN handshake.
///
/// Derived independently by both peers from the PIN and both device ids;
/// keys payload encryption for that peer.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PairingSecret([u8; 32]);

impl PairingSecret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Intentionally opaque debug to avoid logging secrets
impl std::fmt::Debug for PairingSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PairingSecret([REDACTED])")
    }
}

/// Pinned trust for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRecord {
    /// Trusted device.
    pub device_id: DeviceId,
    /// Pinned certificate fingerprint.
    pub certificate_fingerprint: Fingerprint,
    /// Epoch milliseconds when trust was granted.
    pub established_at: u64,
    /// Epoch milliseconds when trust lapses (`None` = never).
    pub expires_at: Option<u64>,
    /// Secret agreed during pairing, if one was derived.
    pub secret: Option<PairingSecret>,
}

impl TrustRecord {
    /// Whether the record has lapsed at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(expires) if now_ms >= expires)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn device() -> DeviceInfo {
        DeviceInfo {
            device_id: DeviceId::new("reader-1"),
            device_name: "Reader".into(),
            device_type: DeviceType::Android,
            app_version: "1.0.0".into(),
            ip_address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            port: 8765,
            last_seen: 1_000,
        }
    }

    #[test]
    fn socket_addr_combines_ip_and_port() {
        assert_eq!(device().socket_addr().to_string(), "192.168.1.20:8765");
    }

    #[test]
    fn age_saturates_for_clock_skew() {
        let d = device();
        assert_eq!(d.age_ms(3_500), 2_500);
        assert_eq!(d.age_ms(10), 0);
    }

    #[test]
    fn trust_record_without_expiry_never_lapses() {
        let record = TrustRecord {
            device_id: DeviceId::new("a"),
            certificate_fingerprint: Fingerprint::from_certificate(b"a"),
            established_at: 0,
            expires_at: None,
            secret: None,
        };
        assert!(!record.is_expired_at(u64::MAX));
    }

    #[test]
    fn trust_record_lapses_at_expiry() {
        let record = TrustRecord {
            device_id: DeviceId::new("a"),
            certificate_fingerprint: Fingerprint::from_certificate(b"a"),
            established_at: 0,
            expires_at: Some(1_000),
            secret: None,
        };
        assert!(!record.is_expired_at(999));
        assert!(record.is_expired_at(1_000));
    }

    #[test]
    fn pairing_secret_debug_is_redacted() {
        let secret = PairingSecret::from_bytes([7u8; 32]);
        assert_eq!(format!("{:?}", secret), "PairingSecret([REDACTED])");
    }
}
