//! In-memory trust store.

use super::{check_replacement, new_record, TrustStatus, TrustStore};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use sync_types::{DeviceId, Fingerprint, PairingSecret, SyncError, TrustRecord};
use tracing::{debug, info};

/// Trust records keyed by device id.
///
/// Each operation runs under the DashMap entry lock for its device, so
/// check-then-write is atomic per device.
#[derive(Clone)]
pub struct MemoryTrustStore {
    records: Arc<DashMap<DeviceId, Slot>>,
    last_syncs: Arc<DashMap<DeviceId, u64>>,
    clock: Arc<dyn Clock>,
}

enum Slot {
    Live(TrustRecord),
    /// Lapsed trust; fingerprint and secret are gone.
    Lapsed,
}

impl Slot {
    /// Returns whether the slot lapsed just now.
    fn lapse_if_expired(&mut self, now: u64) -> bool {
        let lapsed = matches!(self, Slot::Live(record) if record.is_expired_at(now));
        if lapsed {
            *self = Slot::Lapsed;
        }
        lapsed
    }
}

impl MemoryTrustStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            last_syncs: Arc::new(DashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn lookup(&self, device_id: &DeviceId) -> Result<TrustStatus, SyncError> {
        let now = self.clock.now_ms();
        match self.records.entry(device_id.clone()) {
            Entry::Vacant(_) => Ok(TrustStatus::Absent),
            Entry::Occupied(mut entry) => {
                if entry.get_mut().lapse_if_expired(now) {
                    debug!(device_id = %device_id, "purged expired trust");
                }
                Ok(match entry.get() {
                    Slot::Live(record) => TrustStatus::Trusted(record.clone()),
                    Slot::Lapsed => TrustStatus::Expired,
                })
            }
        }
    }

    async fn record_trust(
        &self,
        device_id: &DeviceId,
        fingerprint: &Fingerprint,
        ttl_ms: Option<u64>,
        secret: Option<PairingSecret>,
    ) -> Result<TrustRecord, SyncError> {
        let now = self.clock.now_ms();
        let record = new_record(device_id, fingerprint, ttl_ms, secret, now);
        match self.records.entry(device_id.clone()) {
            Entry::Occupied(mut entry) => {
                if let Slot::Live(existing) = entry.get() {
                    check_replacement(device_id, Some(existing), fingerprint, now)?;
                }
                entry.insert(Slot::Live(record.clone()));
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::Live(record.clone()));
            }
        }
        info!(device_id = %device_id, fingerprint = ?fingerprint, "trust recorded");
        Ok(record)
    }

    async fn revoke(&self, device_id: &DeviceId) -> Result<bool, SyncError> {
        let removed = self.records.remove(device_id).is_some();
        self.last_syncs.remove(device_id);
        if removed {
            info!(device_id = %device_id, "trust revoked");
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<TrustRecord>, SyncError> {
        let now = self.clock.now_ms();
        let mut live = Vec::new();
        for mut slot in self.records.iter_mut() {
            if slot.lapse_if_expired(now) {
                debug!(device_id = %slot.key(), "purged expired trust");
            }
            if let Slot::Live(record) = slot.value() {
                live.push(record.clone());
            }
        }
        live.sort_by(|a, b| a.device_id.as_str().cmp(b.device_id.as_str()));
        Ok(live)
    }

    async fn record_sync(&self, device_id: &DeviceId, at_ms: u64) -> Result<(), SyncError> {
        self.last_syncs.insert(device_id.clone(), at_ms);
        Ok(())
    }

    async fn last_sync(&self, device_id: &DeviceId) -> Result<Option<u64>, SyncError> {
        Ok(self.last_syncs.get(device_id).map(|at| *at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::trust::contract;

    fn store() -> (MemoryTrustStore, ManualClock) {
        let clock = ManualClock::new(0);
        (MemoryTrustStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn records_and_reads_back() {
        contract::records_and_reads_back(&store().0).await;
    }

    #[tokio::test]
    async fn same_fingerprint_is_idempotent() {
        contract::same_fingerprint_is_idempotent(&store().0).await;
    }

    #[tokio::test]
    async fn different_fingerprint_is_a_mismatch() {
        contract::different_fingerprint_is_a_mismatch(&store().0).await;
    }

    #[tokio::test]
    async fn expiry_persists_until_revoked() {
        let (store, clock) = store();
        contract::expiry_persists_until_revoked(&store, &clock).await;
    }

    #[tokio::test]
    async fn listing_keeps_the_tombstone() {
        let (store, clock) = store();
        contract::listing_keeps_the_tombstone(&store, &clock).await;
    }

    #[tokio::test]
    async fn sync_time_is_remembered() {
        contract::sync_time_is_remembered(&store().0).await;
    }

    #[tokio::test]
    async fn expired_trust_can_be_replaced() {
        let (store, clock) = store();
        contract::expired_trust_can_be_replaced(&store, &clock).await;
    }

    #[tokio::test]
    async fn list_skips_lapsed() {
        let (store, clock) = store();
        contract::list_skips_lapsed(&store, &clock).await;
    }

    #[tokio::test]
    async fn clones_share_records() {
        let (store, _) = store();
        let other = store.clone();
        store
            .record_trust(&DeviceId::new("d"), &Fingerprint::new("CERT-x"), None, None)
            .await
            .unwrap();
        assert!(other.is_trusted(&DeviceId::new("d")).await.unwrap());
    }
}
