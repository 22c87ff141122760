//! Trust store: pinned certificate fingerprints per device.
//!
//! At most one fingerprint is trusted per device id. A different
//! fingerprint is never silently accepted: replacing it takes an explicit
//! [`TrustStore::revoke`] followed by [`TrustStore::record_trust`].
//!
//! Expiry is lazy. The first read that finds a lapsed record purges its
//! fingerprint and secret and leaves a tombstone, so every later lookup
//! keeps reporting [`TrustStatus::Expired`] until the device is revoked or
//! paired again.
//!
//! Stores also remember when the last successful sync with each device
//! finished.

mod memory;
mod sqlite;

pub use memory::MemoryTrustStore;
pub use sqlite::SqliteTrustStore;

use async_trait::async_trait;
use sync_types::{DeviceId, Fingerprint, PairingSecret, SyncError, TrustRecord};

/// Result of a trust lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustStatus {
    /// Live trust.
    Trusted(TrustRecord),
    /// Trust has lapsed; only a tombstone remains.
    Expired,
    /// No trust on file.
    Absent,
}

/// Keyed trust storage.
///
/// Every read goes through [`lookup`](TrustStore::lookup) or
/// [`list`](TrustStore::list), so every read turns lapsed trust into a
/// tombstone.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Look up trust for a device, tombstoning it if it has lapsed.
    async fn lookup(&self, device_id: &DeviceId) -> Result<TrustStatus, SyncError>;

    /// Pin `fingerprint` for `device_id`.
    ///
    /// Re-recording the same fingerprint refreshes the record. A different
    /// fingerprint over live trust fails with `CERTIFICATE_MISMATCH`.
    /// Recording over a tombstone clears it.
    async fn record_trust(
        &self,
        device_id: &DeviceId,
        fingerprint: &Fingerprint,
        ttl_ms: Option<u64>,
        secret: Option<PairingSecret>,
    ) -> Result<TrustRecord, SyncError>;

    /// Remove trust, tombstone and sync history. Returns whether a record
    /// or tombstone existed.
    async fn revoke(&self, device_id: &DeviceId) -> Result<bool, SyncError>;

    /// All live records (lapsed ones are tombstoned on the way).
    async fn list(&self) -> Result<Vec<TrustRecord>, SyncError>;

    /// Remember that a sync with `device_id` finished at `at_ms`.
    async fn record_sync(&self, device_id: &DeviceId, at_ms: u64) -> Result<(), SyncError>;

    /// When the last successful sync with `device_id` finished.
    async fn last_sync(&self, device_id: &DeviceId) -> Result<Option<u64>, SyncError>;

    /// Whether the device is currently trusted.
    async fn is_trusted(&self, device_id: &DeviceId) -> Result<bool, SyncError> {
        Ok(matches!(
            self.lookup(device_id).await?,
            TrustStatus::Trusted(_)
        ))
    }

    /// Pinned fingerprint, if trusted.
    async fn fingerprint(&self, device_id: &DeviceId) -> Result<Option<Fingerprint>, SyncError> {
        Ok(match self.lookup(device_id).await? {
            TrustStatus::Trusted(record) => Some(record.certificate_fingerprint),
            _ => None,
        })
    }

    /// Whether trust has lapsed and not been renewed or revoked.
    async fn is_expired(&self, device_id: &DeviceId) -> Result<bool, SyncError> {
        Ok(matches!(self.lookup(device_id).await?, TrustStatus::Expired))
    }
}

/// Decide whether `fingerprint` may be recorded over `existing`.
///
/// Lapsed records never block; a live record must carry the same
/// fingerprint.
pub(crate) fn check_replacement(
    device_id: &DeviceId,
    existing: Option<&TrustRecord>,
    fingerprint: &Fingerprint,
    now_ms: u64,
) -> Result<(), SyncError> {
    match existing {
        Some(record)
            if !record.is_expired_at(now_ms) && record.certificate_fingerprint != *fingerprint =>
        {
            Err(SyncError::CertificateMismatch {
                device_id: device_id.clone(),
            })
        }
        _ => Ok(()),
    }
}

pub(crate) fn new_record(
    device_id: &DeviceId,
    fingerprint: &Fingerprint,
    ttl_ms: Option<u64>,
    secret: Option<PairingSecret>,
    now_ms: u64,
) -> TrustRecord {
    TrustRecord {
        device_id: device_id.clone(),
        certificate_fingerprint: fingerprint.clone(),
        established_at: now_ms,
        expires_at: ttl_ms.map(|ttl| now_ms.saturating_add(ttl)),
        secret,
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every [`TrustStore`] must share; run by each backend.

    use super::*;
    use crate::clock::ManualClock;
    use sync_types::SyncErrorKind;

    fn fp(seed: &str) -> Fingerprint {
        Fingerprint::from_certificate(seed.as_bytes())
    }

    pub async fn records_and_reads_back(store: &dyn TrustStore) {
        let id = DeviceId::new("tablet");
        assert_eq!(store.lookup(&id).await.unwrap(), TrustStatus::Absent);

        let secret = PairingSecret::from_bytes([7u8; 32]);
        store
            .record_trust(&id, &fp("a"), None, Some(secret.clone()))
            .await
            .unwrap();
        assert!(store.is_trusted(&id).await.unwrap());
        assert_eq!(store.fingerprint(&id).await.unwrap(), Some(fp("a")));
        match store.lookup(&id).await.unwrap() {
            TrustStatus::Trusted(record) => {
                assert_eq!(record.secret, Some(secret));
                assert_eq!(record.expires_at, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    pub async fn same_fingerprint_is_idempotent(store: &dyn TrustStore) {
        let id = DeviceId::new("tablet");
        store.record_trust(&id, &fp("a"), None, None).await.unwrap();
        store.record_trust(&id, &fp("a"), None, None).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    pub async fn different_fingerprint_is_a_mismatch(store: &dyn TrustStore) {
        let id = DeviceId::new("tablet");
        store.record_trust(&id, &fp("a"), None, None).await.unwrap();
        let err = store
            .record_trust(&id, &fp("b"), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SyncErrorKind::CertificateMismatch);
        assert_eq!(store.fingerprint(&id).await.unwrap(), Some(fp("a")));

        assert!(store.revoke(&id).await.unwrap());
        store.record_trust(&id, &fp("b"), None, None).await.unwrap();
        assert_eq!(store.fingerprint(&id).await.unwrap(), Some(fp("b")));
    }

    pub async fn expiry_persists_until_revoked(store: &dyn TrustStore, clock: &ManualClock) {
        let id = DeviceId::new("tablet");
        clock.set(0);
        store
            .record_trust(&id, &fp("a"), Some(1000), Some(PairingSecret::from_bytes([1; 32])))
            .await
            .unwrap();
        clock.set(999);
        assert!(store.is_trusted(&id).await.unwrap());

        clock.set(2000);
        assert_eq!(store.lookup(&id).await.unwrap(), TrustStatus::Expired);
        assert_eq!(store.lookup(&id).await.unwrap(), TrustStatus::Expired);
        assert!(store.is_expired(&id).await.unwrap());
        assert_eq!(store.fingerprint(&id).await.unwrap(), None);

        assert!(store.revoke(&id).await.unwrap());
        assert_eq!(store.lookup(&id).await.unwrap(), TrustStatus::Absent);
        assert!(!store.revoke(&id).await.unwrap());
    }

    pub async fn listing_keeps_the_tombstone(store: &dyn TrustStore, clock: &ManualClock) {
        let id = DeviceId::new("tablet");
        clock.set(0);
        store
            .record_trust(&id, &fp("a"), Some(1000), None)
            .await
            .unwrap();
        clock.set(2000);
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.lookup(&id).await.unwrap(), TrustStatus::Expired);
    }

    pub async fn expired_trust_can_be_replaced(store: &dyn TrustStore, clock: &ManualClock) {
        let id = DeviceId::new("tablet");
        clock.set(0);
        store
            .record_trust(&id, &fp("a"), Some(10), None)
            .await
            .unwrap();
        clock.set(50);
        assert_eq!(store.lookup(&id).await.unwrap(), TrustStatus::Expired);
        store.record_trust(&id, &fp("b"), None, None).await.unwrap();
        assert_eq!(store.fingerprint(&id).await.unwrap(), Some(fp("b")));
        assert!(!store.is_expired(&id).await.unwrap());
    }

    pub async fn list_skips_lapsed(store: &dyn TrustStore, clock: &ManualClock) {
        clock.set(0);
        store
            .record_trust(&DeviceId::new("short"), &fp("s"), Some(10), None)
            .await
            .unwrap();
        store
            .record_trust(&DeviceId::new("long"), &fp("l"), None, None)
            .await
            .unwrap();
        clock.set(100);
        let live = store.list().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].device_id, DeviceId::new("long"));
    }

    pub async fn sync_time_is_remembered(store: &dyn TrustStore) {
        let id = DeviceId::new("tablet");
        store.record_trust(&id, &fp("a"), None, None).await.unwrap();
        assert_eq!(store.last_sync(&id).await.unwrap(), None);

        store.record_sync(&id, 500).await.unwrap();
        store.record_sync(&id, 900).await.unwrap();
        assert_eq!(store.last_sync(&id).await.unwrap(), Some(900));

        store.revoke(&id).await.unwrap();
        assert_eq!(store.last_sync(&id).await.unwrap(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_mismatch_is_rejected_but_lapsed_is_not() {
        let id = DeviceId::new("d");
        let old = new_record(&id, &Fingerprint::new("CERT-a"), Some(10), None, 0);
        let new_fp = Fingerprint::new("CERT-b");
        assert!(check_replacement(&id, Some(&old), &new_fp, 5).is_err());
        assert!(check_replacement(&id, Some(&old), &new_fp, 10).is_ok());
        assert!(check_replacement(&id, None, &new_fp, 0).is_ok());
    }

    #[test]
    fn ttl_sets_expiry() {
        let record = new_record(&DeviceId::new("d"), &Fingerprint::new("CERT-a"), Some(1000), None, 5);
        assert_eq!(record.expires_at, Some(1005));
        assert_eq!(record.established_at, 5);
    }
}
