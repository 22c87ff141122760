//! Local device identity.
//!
//! A device is identified on the LAN by its [`DeviceInfo`] and proves it
//! is the same installation through a certificate whose fingerprint peers
//! pin at pairing time. The certificate is represented by a random
//! 32-byte seed; the fingerprint is its SHA-256.

use std::net::IpAddr;
use sync_types::{DeviceId, DeviceInfo, DeviceType, Fingerprint};
use zeroize::Zeroize;

/// This device's identity.
#[derive(Clone)]
pub struct DeviceIdentity {
    info: DeviceInfo,
    certificate_seed: [u8; 32],
    fingerprint: Fingerprint,
}

impl DeviceIdentity {
    /// Create a fresh identity with a random id and certificate.
    pub fn generate(
        device_name: impl Into<String>,
        device_type: DeviceType,
        app_version: impl Into<String>,
        ip_address: IpAddr,
        port: u16,
    ) -> Self {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("getrandom failed");
        let info = DeviceInfo {
            device_id: DeviceId::generate(),
            device_name: device_name.into(),
            device_type,
            app_version: app_version.into(),
            ip_address,
            port,
            last_seen: 0,
        };
        Self::from_parts(info, seed)
    }

    /// Rebuild a stored identity.
    pub fn from_parts(info: DeviceInfo, certificate_seed: [u8; 32]) -> Self {
        let fingerprint = Fingerprint::from_certificate(&certificate_seed);
        Self {
            info,
            certificate_seed,
            fingerprint,
        }
    }

    /// Same identity reachable at a different address.
    pub fn with_address(mut self, ip_address: IpAddr, port: u16) -> Self {
        self.info.ip_address = ip_address;
        self.info.port = port;
        self
    }

    /// Device description announced to peers.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Device id.
    pub fn device_id(&self) -> &DeviceId {
        &self.info.device_id
    }

    /// Certificate fingerprint peers pin.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Certificate seed, for persisting the identity.
    pub fn certificate_seed(&self) -> &[u8; 32] {
        &self.certificate_seed
    }
}

impl Drop for DeviceIdentity {
    fn drop(&mut self) {
        self.certificate_seed.zeroize();
    }
}

// Intentionally opaque debug to avoid logging the certificate seed
impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.info.device_id)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::generate(
            "Phone",
            DeviceType::Android,
            "1.0.0",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            8963,
        )
    }

    #[test]
    fn generated_identities_are_distinct() {
        let a = identity();
        let b = identity();
        assert_ne!(a.device_id(), b.device_id());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_follows_the_seed() {
        let original = identity();
        let restored =
            DeviceIdentity::from_parts(original.info().clone(), *original.certificate_seed());
        assert_eq!(restored.fingerprint(), original.fingerprint());
        assert!(restored.fingerprint().as_str().starts_with(Fingerprint::PREFIX));
    }

    #[test]
    fn address_can_change() {
        let moved = identity().with_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 9000);
        assert_eq!(moved.info().socket_addr().to_string(), "10.0.0.2:9000");
    }

    #[test]
    fn debug_hides_seed() {
        let id = identity();
        let debug = format!("{:?}", id);
        assert!(!debug.contains(&format!("{:?}", id.certificate_seed())));
        assert!(debug.contains("fingerprint"));
    }
}
