//! SQLite trust store.
//!
//! Same contract as [`MemoryTrustStore`](super::MemoryTrustStore). Live
//! trust is kept in `trusted_devices`, tombstones in `lapsed_trust` and
//! sync times in `sync_history`. Check-then-write runs inside a
//! transaction.

use super::{check_replacement, new_record, TrustStatus, TrustStore};
use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use sync_types::{DeviceId, Fingerprint, PairingSecret, SyncError, TrustRecord};
use tracing::{debug, info};

/// SQLite-backed trust store.
#[derive(Clone)]
pub struct SqliteTrustStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

#[derive(sqlx::FromRow)]
struct TrustRow {
    device_id: String,
    certificate_fingerprint: String,
    established_at: i64,
    expires_at: Option<i64>,
    secret: Option<Vec<u8>>,
}

impl TrustRow {
    fn into_record(self) -> Result<TrustRecord, StorageError> {
        let secret = match self.secret {
            None => None,
            Some(bytes) => {
                let raw: [u8; 32] =
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| StorageError::Corrupt {
                            device_id: self.device_id.clone(),
                            reason: format!("secret is {} bytes", bytes.len()),
                        })?;
                Some(PairingSecret::from_bytes(raw))
            }
        };
        Ok(TrustRecord {
            device_id: DeviceId::new(self.device_id),
            certificate_fingerprint: Fingerprint::new(self.certificate_fingerprint),
            established_at: self.established_at as u64,
            expires_at: self.expires_at.map(|e| e as u64),
            secret,
        })
    }
}

impl SqliteTrustStore {
    /// Open (or create) the trust database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        Self::with_clock(path, Arc::new(SystemClock)).await
    }

    /// Open the trust database reading time from `clock`.
    pub async fn with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool, clock };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory trust database (for testing).
    pub async fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // One connection: every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool, clock };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trusted_devices (
                device_id TEXT PRIMARY KEY,
                certificate_fingerprint TEXT NOT NULL,
                established_at INTEGER NOT NULL,
                expires_at INTEGER,
                secret BLOB
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trusted_devices_expires ON trusted_devices(expires_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lapsed_trust (
                device_id TEXT PRIMARY KEY,
                lapsed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_history (
                device_id TEXT PRIMARY KEY,
                last_sync_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn lookup_inner(&self, device_id: &DeviceId) -> Result<TrustStatus, StorageError> {
        let now = self.clock.now_ms();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, TrustRow>(
            r#"
            SELECT device_id, certificate_fingerprint, established_at, expires_at, secret
            FROM trusted_devices
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let status = match row {
            None => {
                let lapsed = sqlx::query("SELECT 1 FROM lapsed_trust WHERE device_id = ?1")
                    .bind(device_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
                if lapsed.is_some() {
                    TrustStatus::Expired
                } else {
                    TrustStatus::Absent
                }
            }
            Some(row) => {
                let record = row.into_record()?;
                if record.is_expired_at(now) {
                    sqlx::query("DELETE FROM trusted_devices WHERE device_id = ?1")
                        .bind(device_id.as_str())
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query(
                        "INSERT OR REPLACE INTO lapsed_trust (device_id, lapsed_at) VALUES (?1, ?2)",
                    )
                    .bind(device_id.as_str())
                    .bind(now as i64)
                    .execute(&mut *tx)
                    .await?;
                    debug!(device_id = %device_id, "purged expired trust");
                    TrustStatus::Expired
                } else {
                    TrustStatus::Trusted(record)
                }
            }
        };
        tx.commit().await?;
        Ok(status)
    }

    async fn record_inner(
        &self,
        device_id: &DeviceId,
        fingerprint: &Fingerprint,
        ttl_ms: Option<u64>,
        secret: Option<PairingSecret>,
    ) -> Result<Result<TrustRecord, SyncError>, StorageError> {
        let now = self.clock.now_ms();
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, TrustRow>(
            r#"
            SELECT device_id, certificate_fingerprint, established_at, expires_at, secret
            FROM trusted_devices
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(TrustRow::into_record)
        .transpose()?;

        if let Err(mismatch) = check_replacement(device_id, existing.as_ref(), fingerprint, now) {
            tx.rollback().await?;
            return Ok(Err(mismatch));
        }

        let record = new_record(device_id, fingerprint, ttl_ms, secret, now);
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO trusted_devices
                (device_id, certificate_fingerprint, established_at, expires_at, secret)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(record.device_id.as_str())
        .bind(record.certificate_fingerprint.as_str())
        .bind(record.established_at as i64)
        .bind(record.expires_at.map(|e| e as i64))
        .bind(record.secret.as_ref().map(|s| s.as_bytes().to_vec()))
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM lapsed_trust WHERE device_id = ?1")
            .bind(device_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Ok(record))
    }

    async fn revoke_inner(&self, device_id: &DeviceId) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        let live = sqlx::query("DELETE FROM trusted_devices WHERE device_id = ?1")
            .bind(device_id.as_str())
            .execute(&mut *tx)
            .await?;
        let lapsed = sqlx::query("DELETE FROM lapsed_trust WHERE device_id = ?1")
            .bind(device_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sync_history WHERE device_id = ?1")
            .bind(device_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(live.rows_affected() + lapsed.rows_affected() > 0)
    }

    async fn list_inner(&self) -> Result<Vec<TrustRecord>, StorageError> {
        let now = self.clock.now_ms() as i64;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO lapsed_trust (device_id, lapsed_at)
            SELECT device_id, ?1 FROM trusted_devices
            WHERE expires_at IS NOT NULL AND expires_at <= ?1
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM trusted_devices WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let rows = sqlx::query_as::<_, TrustRow>(
            r#"
            SELECT device_id, certificate_fingerprint, established_at, expires_at, secret
            FROM trusted_devices
            ORDER BY device_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrustRow::into_record).collect()
    }
}

#[async_trait]
impl TrustStore for SqliteTrustStore {
    async fn lookup(&self, device_id: &DeviceId) -> Result<TrustStatus, SyncError> {
        Ok(self.lookup_inner(device_id).await?)
    }

    async fn record_trust(
        &self,
        device_id: &DeviceId,
        fingerprint: &Fingerprint,
        ttl_ms: Option<u64>,
        secret: Option<PairingSecret>,
    ) -> Result<TrustRecord, SyncError> {
        let record = self
            .record_inner(device_id, fingerprint, ttl_ms, secret)
            .await??;
        info!(device_id = %device_id, fingerprint = ?fingerprint, "trust recorded");
        Ok(record)
    }

    async fn revoke(&self, device_id: &DeviceId) -> Result<bool, SyncError> {
        let removed = self.revoke_inner(device_id).await?;
        if removed {
            info!(device_id = %device_id, "trust revoked");
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<TrustRecord>, SyncError> {
        Ok(self.list_inner().await?)
    }

    async fn record_sync(&self, device_id: &DeviceId, at_ms: u64) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_history (device_id, last_sync_at) VALUES (?1, ?2)",
        )
        .bind(device_id.as_str())
        .bind(at_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn last_sync(&self, device_id: &DeviceId) -> Result<Option<u64>, SyncError> {
        let at: Option<i64> =
            sqlx::query_scalar("SELECT last_sync_at FROM sync_history WHERE device_id = ?1")
                .bind(device_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(at.map(|at| at as u64))
    }
}
