//! Resource coordinator.
//!
//! Keeps the device awake while sessions run and records how much of the
//! monitored resource (battery on phones) each session used.
//!
//! The wake lock is shared: the first session acquires it and the last
//! one to finish releases it. Every session holds a [`ResourceGuard`]
//! whose `Drop` does the release, so no exit path can leak the lock.
//!
//! Both seams are fail-open. A wake lock or monitor error is logged and
//! the session continues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sync_types::DeviceId;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Resource seam errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The platform refused or does not support the request.
    #[error("resource unavailable: {0}")]
    Unavailable(String),
}

/// Platform wake lock.
pub trait WakeLock: Send + Sync {
    /// Keep the device awake.
    fn acquire(&self) -> Result<(), ResourceError>;

    /// Let the device sleep again.
    fn release(&self) -> Result<(), ResourceError>;
}

/// Reads the monitored resource level (0-100).
pub trait ResourceMonitor: Send + Sync {
    /// Current level in percent.
    fn resource_level(&self) -> Result<u8, ResourceError>;
}

/// No wake lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn release(&self) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Monitor for hosts without a meaningful level (mains-powered desktops).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl ResourceMonitor for NoopMonitor {
    fn resource_level(&self) -> Result<u8, ResourceError> {
        Ok(100)
    }
}

/// Resource usage of one finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReport {
    /// Peer of the session.
    pub device_id: DeviceId,
    /// Level when the session started, if it could be read.
    pub start_level: Option<u8>,
    /// Level when it ended, if it could be read.
    pub end_level: Option<u8>,
    /// Time the guard was held.
    pub duration: Duration,
    /// Payload bytes moved.
    pub bytes_transferred: u64,
}

impl ResourceReport {
    /// Level consumed, when both readings exist.
    pub fn level_used(&self) -> Option<u8> {
        Some(self.start_level?.saturating_sub(self.end_level?))
    }
}

struct Shared {
    wake_lock: Arc<dyn WakeLock>,
    monitor: Arc<dyn ResourceMonitor>,
    holders: Mutex<u32>,
    last_report: Mutex<Option<ResourceReport>>,
}

impl Shared {
    fn level(&self) -> Option<u8> {
        match self.monitor.resource_level() {
            Ok(level) => Some(level),
            Err(e) => {
                warn!(error = %e, "resource level unavailable");
                None
            }
        }
    }
}

/// Hands out [`ResourceGuard`]s around sessions.
#[derive(Clone)]
pub struct ResourceCoordinator {
    shared: Arc<Shared>,
}

impl ResourceCoordinator {
    /// Coordinate `wake_lock` and `monitor`.
    pub fn new(wake_lock: Arc<dyn WakeLock>, monitor: Arc<dyn ResourceMonitor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                wake_lock,
                monitor,
                holders: Mutex::new(0),
                last_report: Mutex::new(None),
            }),
        }
    }

    /// Coordinator with no platform resources.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopWakeLock), Arc::new(NoopMonitor))
    }

    /// Acquire resources for a session with `device_id`.
    pub fn acquire(&self, device_id: &DeviceId) -> ResourceGuard {
        {
            let mut holders = lock(&self.shared.holders);
            if *holders == 0 {
                match self.shared.wake_lock.acquire() {
                    Ok(()) => debug!("wake lock acquired"),
                    Err(e) => warn!(error = %e, "wake lock not acquired, continuing"),
                }
            }
            *holders += 1;
        }

        ResourceGuard {
            shared: Arc::clone(&self.shared),
            device_id: device_id.clone(),
            start_level: self.shared.level(),
            started: Instant::now(),
            bytes_transferred: AtomicU64::new(0),
        }
    }

    /// Sessions currently holding a guard.
    pub fn active_holders(&self) -> u32 {
        *lock(&self.shared.holders)
    }

    /// Report of the most recently released guard.
    pub fn last_report(&self) -> Option<ResourceReport> {
        lock(&self.shared.last_report).clone()
    }
}

impl Default for ResourceCoordinator {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for ResourceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCoordinator")
            .field("active_holders", &self.active_holders())
            .finish_non_exhaustive()
    }
}

/// Held for the lifetime of one session; releases on drop.
pub struct ResourceGuard {
    shared: Arc<Shared>,
    device_id: DeviceId,
    start_level: Option<u8>,
    started: Instant,
    bytes_transferred: AtomicU64,
}

impl ResourceGuard {
    /// Set the byte count reported on release.
    pub fn set_bytes_transferred(&self, bytes: u64) {
        self.bytes_transferred.store(bytes, Ordering::Relaxed);
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let report = ResourceReport {
            device_id: self.device_id.clone(),
            start_level: self.start_level,
            end_level: self.shared.level(),
            duration: self.started.elapsed(),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        };

        {
            let mut holders = lock(&self.shared.holders);
            *holders = holders.saturating_sub(1);
            if *holders == 0 {
                match self.shared.wake_lock.release() {
                    Ok(()) => debug!("wake lock released"),
                    Err(e) => warn!(error = %e, "wake lock release failed"),
                }
            }
        }

        info!(
            device_id = %report.device_id,
            start_level = ?report.start_level,
            end_level = ?report.end_level,
            duration_ms = report.duration.as_millis() as u64,
            bytes = report.bytes_transferred,
            "session resources released"
        );
        *lock(&self.shared.last_report) = Some(report);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // Guards are dropped during unwinding too; a poisoned lock still holds
    // a usable count.
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
