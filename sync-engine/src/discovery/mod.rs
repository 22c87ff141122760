//! LAN discovery.
//!
//! [`DiscoveryService`] periodically announces this device and collects
//! announcements from peers. The discovered set is published on a
//! `watch` channel (the latest value is always available to new
//! subscribers); entries are replaced by device id and never evicted,
//! callers judge freshness from `last_seen`.
//!
//! Network failures are retried with capped exponential backoff. After
//! `max_retries` consecutive failures the service reports
//! [`DiscoveryStatus::Failed`] and stops; the host keeps running.

mod mock;
mod udp;

pub use mock::MockAnnouncer;
pub use udp::UdpAnnouncer;

use async_trait::async_trait;
use std::sync::Arc;
use sync_core::Backoff;
use sync_types::{Announce, DeviceInfo, SyncError, PROTOCOL_VERSION};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::DiscoveryConfig;
use crate::transport::TransportError;

/// Broadcasts and receives presence announcements.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Broadcast one announcement.
    async fn announce(&self, announce: &Announce) -> Result<(), TransportError>;

    /// Wait for the next announcement from the network.
    ///
    /// Must be cancel safe: the service drops pending calls when it
    /// announces or shuts down.
    async fn receive(&self) -> Result<Announce, TransportError>;
}

/// Lifecycle of the discovery service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiscoveryStatus {
    /// Never started.
    #[default]
    Idle,
    /// Announcing and listening.
    Running,
    /// Stopped on request.
    Stopped,
    /// Gave up after repeated network failures.
    Failed(SyncError),
}

/// Announces this device and tracks peers.
pub struct DiscoveryService {
    announcer: Arc<dyn Announcer>,
    local: DeviceInfo,
    config: DiscoveryConfig,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    devices: Arc<watch::Sender<Vec<DeviceInfo>>>,
    status: Arc<watch::Sender<DiscoveryStatus>>,
    running: Mutex<Option<RunningTask>>,
}

struct RunningTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DiscoveryService {
    /// Create a stopped service announcing `local`.
    pub fn new(
        announcer: Arc<dyn Announcer>,
        local: DeviceInfo,
        config: DiscoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (devices, _) = watch::channel(Vec::new());
        let (status, _) = watch::channel(DiscoveryStatus::Idle);
        Self {
            announcer,
            local,
            config,
            backoff: Backoff::default(),
            clock,
            devices: Arc::new(devices),
            status: Arc::new(status),
            running: Mutex::new(None),
        }
    }

    /// Override the retry backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Start announcing and listening. Starting twice is a no-op.
    pub async fn start_discovery(&self) {
        let mut running = self.running.lock().await;
        if let Some(task) = running.as_ref() {
            if !task.handle.is_finished() {
                return;
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            announcer: Arc::clone(&self.announcer),
            local: self.local.clone(),
            config: self.config.clone(),
            backoff: self.backoff,
            clock: Arc::clone(&self.clock),
            devices: Arc::clone(&self.devices),
            status: Arc::clone(&self.status),
        };
        self.status.send_replace(DiscoveryStatus::Running);
        info!(device_id = %self.local.device_id, port = self.config.port, "discovery started");
        let handle = tokio::spawn(worker.run(shutdown_rx));
        *running = Some(RunningTask { shutdown, handle });
    }

    /// Stop announcing and listening.
    pub async fn stop_discovery(&self) {
        let task = self.running.lock().await.take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "discovery task ended abnormally");
            }
        }
        // A failure status stays visible; otherwise report the stop.
        self.status.send_if_modified(|status| {
            if matches!(status, DiscoveryStatus::Failed(_)) {
                false
            } else {
                *status = DiscoveryStatus::Stopped;
                true
            }
        });
        info!(device_id = %self.local.device_id, "discovery stopped");
    }

    /// Subscribe to the discovered device set.
    pub fn devices(&self) -> watch::Receiver<Vec<DeviceInfo>> {
        self.devices.subscribe()
    }

    /// Subscribe to the service status.
    pub fn status(&self) -> watch::Receiver<DiscoveryStatus> {
        self.status.subscribe()
    }

    /// Forget every discovered device (the network changed).
    pub fn on_network_changed(&self) {
        self.devices.send_replace(Vec::new());
        debug!("discovered devices cleared after network change");
    }
}

struct Worker {
    announcer: Arc<dyn Announcer>,
    local: DeviceInfo,
    config: DiscoveryConfig,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    devices: Arc<watch::Sender<Vec<DeviceInfo>>>,
    status: Arc<watch::Sender<DiscoveryStatus>>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.broadcast_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            let result = tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => self.announce().await,
                received = self.announcer.receive() => received.map(|a| self.observe(a)),
            };

            match result {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        warn!(error = %e, failures, "discovery giving up");
                        self.status.send_replace(DiscoveryStatus::Failed(SyncError::Network(
                            e.to_string(),
                        )));
                        return;
                    }
                    let delay = self.backoff.delay(failures);
                    debug!(error = %e, failures, ?delay, "discovery network error, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn announce(&self) -> Result<(), TransportError> {
        let mut device = self.local.clone();
        device.last_seen = self.clock.now_ms();
        self.announcer
            .announce(&Announce {
                version: PROTOCOL_VERSION,
                device,
            })
            .await
    }

    fn observe(&self, announce: Announce) {
        if announce.device.device_id == self.local.device_id {
            return;
        }
        if announce.version != PROTOCOL_VERSION {
            debug!(version = announce.version, "ignoring announcement from other protocol version");
            return;
        }
        let mut device = announce.device;
        device.last_seen = self.clock.now_ms();
        self.devices.send_modify(|devices| {
            match devices.iter_mut().find(|d| d.device_id == device.device_id) {
                Some(existing) => *existing = device,
                None => {
                    debug!(device_id = %device.device_id, name = %device.device_name, "discovered device");
                    devices.push(device);
                }
            }
        });
    }
}
