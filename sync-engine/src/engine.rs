//! Transfer engine.
//!
//! [`SyncEngine::sync_with_device`] runs one session with a trusted peer:
//!
//! 1. Preconditions, in order: `NOT_PAIRED`, `TRUST_EXPIRED`,
//!    `SECURITY_VIOLATION`
//! 2. Manifest exchange and diff (conflicts are reported, never moved)
//! 3. The per-item loop in plan order: cancel check, timeout check,
//!    pacing delay, then the item with its retry budget
//! 4. Batch commits every `batch_size` processed items
//!
//! Lifecycle bookkeeping (service start/stop, progress, resume points,
//! notifications) is driven by [`SessionState`] actions.
//!
//! A session that stops on a network error or timeout after planning
//! keeps a [`ResumePoint`]; the next session with that peer continues
//! from the first uncommitted item of the stored plan. The time budget
//! applies to each session on its own, so a resumed session projects only
//! the items it still has to move.
//!
//! When the trust record carries a pairing secret, payloads are always
//! encrypted and the responder's session challenge is answered with a
//! proof of the secret.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sync_core::{
    diff_manifests, BatchReady, BatchTracker, Direction, MemoryTracker, PlannedItem,
    ProgressTracker, ResumeCursor, ResumePoint, SessionAction, SessionEvent, SessionState,
    TransferPlan,
};
use sync_types::{
    BatchCommit, Bye, Challenge, ChallengeResponse, DeviceId, DeviceInfo, Fetch, Manifest, Message,
    PairingSecret, SyncError, SyncErrorKind, SyncProgress, SyncSession,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::TransferConfig;
use crate::crypto::{session_proof, PayloadKey};
use crate::identity::DeviceIdentity;
use crate::library::LocalLibrary;
use crate::payload::{decode_book, encode_book, PayloadBuffer};
use crate::resource::ResourceCoordinator;
use crate::service::{NoopServiceController, ServiceController};
use crate::transport::{recv_message, send_message, PeerTransport, TransportError};
use crate::trust::{TrustStatus, TrustStore};

/// Runs sync sessions with trusted peers.
pub struct SyncEngine {
    identity: DeviceIdentity,
    config: TransferConfig,
    trust: Arc<dyn TrustStore>,
    library: Arc<dyn LocalLibrary>,
    controller: Arc<dyn ServiceController>,
    resources: ResourceCoordinator,
    clock: Arc<dyn Clock>,
    /// Cancel flags of running sessions; presence means "in progress".
    active: DashMap<DeviceId, Arc<AtomicBool>>,
    progress: DashMap<DeviceId, watch::Sender<SyncProgress>>,
    resume_points: DashMap<DeviceId, ResumePoint>,
    last_sessions: DashMap<DeviceId, SyncSession>,
    flagged: DashMap<DeviceId, String>,
}

impl SyncEngine {
    /// Create an engine with no service controller and no platform
    /// resources.
    pub fn new(
        identity: DeviceIdentity,
        config: TransferConfig,
        trust: Arc<dyn TrustStore>,
        library: Arc<dyn LocalLibrary>,
    ) -> Self {
        Self {
            identity,
            config,
            trust,
            library,
            controller: Arc::new(NoopServiceController),
            resources: ResourceCoordinator::noop(),
            clock: Arc::new(SystemClock),
            active: DashMap::new(),
            progress: DashMap::new(),
            resume_points: DashMap::new(),
            last_sessions: DashMap::new(),
            flagged: DashMap::new(),
        }
    }

    /// Report to `controller`.
    pub fn with_controller(mut self, controller: Arc<dyn ServiceController>) -> Self {
        self.controller = controller;
        self
    }

    /// Hold `resources` for the duration of each session.
    pub fn with_resources(mut self, resources: ResourceCoordinator) -> Self {
        self.resources = resources;
        self
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Progress of the current or last session with `device_id`.
    ///
    /// The receiver immediately holds the latest value.
    pub fn observe_progress(&self, device_id: &DeviceId) -> watch::Receiver<SyncProgress> {
        self.progress
            .entry(device_id.clone())
            .or_insert_with(|| watch::channel(SyncProgress::idle(device_id.clone())).0)
            .subscribe()
    }

    /// Ask the running session with `device_id` to stop at the next item
    /// boundary. Returns whether a session was running.
    pub async fn cancel(&self, device_id: &DeviceId) -> bool {
        let flag = self.active.get(device_id).map(|f| Arc::clone(f.value()));
        match flag {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(device_id = %device_id, "sync cancel requested");
                self.controller.cancel_sync().await;
                true
            }
            None => false,
        }
    }

    /// Refuse to sync with `device_id` until the flag is cleared.
    pub fn flag_security_violation(&self, device_id: &DeviceId, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(device_id = %device_id, %reason, "peer flagged as insecure");
        self.flagged.insert(device_id.clone(), reason);
    }

    /// Lift a security flag.
    pub fn clear_security_flag(&self, device_id: &DeviceId) {
        self.flagged.remove(device_id);
    }

    /// The last finished session with `device_id`.
    pub fn last_session(&self, device_id: &DeviceId) -> Option<SyncSession> {
        self.last_sessions.get(device_id).map(|s| s.clone())
    }

    /// Stored resume point for `device_id`.
    pub fn resume_point(&self, device_id: &DeviceId) -> Option<ResumePoint> {
        self.resume_points.get(device_id).map(|p| p.clone())
    }

    /// Run a sync session with `device` over `transport`.
    ///
    /// `transport` is connected to the device's address first if needed.
    /// Returns the finished session for `Completed`, `CompletedWithErrors`
    /// and `Cancelled`; a `Failed` session returns its error (the session
    /// itself stays available through [`last_session`](Self::last_session)).
    pub async fn sync_with_device(
        &self,
        device: &DeviceInfo,
        transport: &dyn PeerTransport,
    ) -> Result<SyncSession, SyncError> {
        let device_id = &device.device_id;
        let active = self.register(device_id)?;
        let resources = self.resources.acquire(device_id);

        let mut run = SessionRun::new(self, device, transport, active.cancel.clone());
        let outcome = run.execute().await;
        let (session, error) = run.finish(outcome).await;
        resources.set_bytes_transferred(session.bytes_transferred);

        self.last_sessions.insert(device_id.clone(), session.clone());
        match error {
            Some(error) => Err(error),
            None => Ok(session),
        }
    }

    fn register(&self, device_id: &DeviceId) -> Result<ActiveSession<'_>, SyncError> {
        let cancel = Arc::new(AtomicBool::new(false));
        match self.active.entry(device_id.clone()) {
            Entry::Occupied(_) => {
                debug!(device_id = %device_id, "sync already running");
                Err(SyncError::SessionInProgress(device_id.clone()))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cancel));
                Ok(ActiveSession {
                    active: &self.active,
                    device_id: device_id.clone(),
                    cancel,
                })
            }
        }
    }

    fn publish(&self, progress: SyncProgress) {
        self.progress
            .entry(progress.device_id.clone())
            .or_insert_with(|| watch::channel(SyncProgress::idle(progress.device_id.clone())).0)
            .send_replace(progress);
    }

    async fn check_preconditions(&self, device_id: &DeviceId) -> Result<PeerKeys, SyncError> {
        let record = match self.trust.lookup(device_id).await? {
            TrustStatus::Trusted(record) => record,
            TrustStatus::Expired => return Err(SyncError::TrustExpired(device_id.clone())),
            TrustStatus::Absent => return Err(SyncError::NotPaired(device_id.clone())),
        };
        if let Some(reason) = self.flagged.get(device_id).map(|r| r.clone()) {
            return Err(SyncError::SecurityViolation(reason));
        }

        if self.config.encryption && record.secret.is_none() {
            return Err(SyncError::SecurityViolation(format!(
                "no pairing secret for {}, cannot encrypt",
                device_id
            )));
        }
        Ok(PeerKeys {
            key: record.secret.as_ref().map(PayloadKey::derive),
            secret: record.secret,
        })
    }
}

/// Marks a device as busy; unregisters on drop.
struct ActiveSession<'a> {
    active: &'a DashMap<DeviceId, Arc<AtomicBool>>,
    device_id: DeviceId,
    cancel: Arc<AtomicBool>,
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.device_id);
    }
}

/// Key material shared with the peer. Without a secret the session runs
/// in plaintext.
struct PeerKeys {
    secret: Option<PairingSecret>,
    key: Option<PayloadKey>,
}

impl PeerKeys {
    fn payload_key(&self) -> Option<&PayloadKey> {
        self.key.as_ref()
    }

    fn encrypts(&self) -> bool {
        self.key.is_some()
    }
}

/// Why a single item attempt failed.
enum ItemError {
    /// Worth another attempt.
    Item(SyncError),
    /// Ends the session.
    Session(SyncError),
}

impl From<TransportError> for ItemError {
    fn from(err: TransportError) -> Self {
        ItemError::Session(err.into())
    }
}

enum Outcome {
    Finished,
    Cancelled,
}

/// Mutable state of one running session.
struct SessionRun<'a> {
    engine: &'a SyncEngine,
    device: &'a DeviceInfo,
    transport: &'a dyn PeerTransport,
    cancel: Arc<AtomicBool>,
    state: SessionState,
    session: SyncSession,
    progress: ProgressTracker,
    current_item: Option<String>,
    started: Instant,
    plan: Option<TransferPlan>,
    cursor: ResumeCursor,
    memory: MemoryTracker,
}

impl<'a> SessionRun<'a> {
    fn new(
        engine: &'a SyncEngine,
        device: &'a DeviceInfo,
        transport: &'a dyn PeerTransport,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            device,
            transport,
            cancel,
            state: SessionState::Idle,
            session: SyncSession::new(device.device_id.clone(), engine.clock.now_ms()),
            progress: ProgressTracker::default(),
            current_item: None,
            started: Instant::now(),
            plan: None,
            cursor: ResumeCursor::new(),
            memory: MemoryTracker::new(),
        }
    }

    fn config(&self) -> &'a TransferConfig {
        &self.engine.config
    }

    async fn execute(&mut self) -> Result<Outcome, SyncError> {
        let device = self.device;
        let peer_id = &device.device_id;
        let keys = self.engine.check_preconditions(peer_id).await?;
        self.session.was_encrypted = keys.encrypts();
        self.fire(SessionEvent::Start).await;

        if !self.transport.is_connected() {
            self.transport
                .connect(&device.socket_addr().to_string())
                .await?;
        }
        let remote = self.exchange_manifests(&keys).await?;
        let books = self.engine.library.get_local_manifest().await?;
        let local = Manifest::from_books(self.engine.identity.device_id().clone(), 0, &books);
        let diff = diff_manifests(&local.items, &remote.items);
        self.session.conflicts = diff.conflicts.clone();
        if !diff.conflicts.is_empty() {
            info!(device_id = %peer_id, conflicts = diff.conflicts.len(), "conflicting items left untouched");
        }

        let stored = self
            .engine
            .resume_points
            .get(peer_id)
            .map(|p| p.clone())
            .filter(ResumePoint::has_remaining);
        let (plan, start) = match stored {
            Some(point) => {
                info!(device_id = %peer_id, from = point.next_index, "resuming interrupted sync");
                self.session.was_resumed = true;
                self.session.resumed_from_item = Some(point.next_index);
                self.session.completed_items = point.completed_items;
                self.session.failed_items = point.failed_items;
                self.session.retry_count = point.retry_count;
                self.session.batch_count = point.batch_count;
                self.session.bytes_transferred = point.bytes_transferred;
                self.cursor = ResumeCursor::starting_at(point.next_index);
                (point.plan, point.next_index)
            }
            None => (diff.plan(), 0),
        };

        let total = plan.len() as u32;
        self.session.total_items = total;
        self.session.items_to_send = plan.ids(Direction::Send);
        self.session.items_to_receive = plan.ids(Direction::Receive);
        self.progress = ProgressTracker::new(total, self.session.completed_items);
        self.plan = Some(plan.clone());
        debug!(
            device_id = %peer_id,
            total,
            send = self.session.items_to_send.len(),
            receive = self.session.items_to_receive.len(),
            "transfer planned"
        );
        self.fire(SessionEvent::ManifestDiffed { total }).await;

        self.transfer(&plan, start, &keys).await
    }

    async fn exchange_manifests(&self, keys: &PeerKeys) -> Result<Manifest, SyncError> {
        let peer_id = &self.device.device_id;
        let books = self.engine.library.get_local_manifest().await?;
        let manifest = Manifest::from_books(
            self.engine.identity.device_id().clone(),
            self.engine.clock.now_ms(),
            &books,
        );
        send_message(self.transport, &Message::Manifest(manifest)).await?;

        let reply = match recv_message(self.transport).await? {
            Message::Challenge(challenge) => {
                self.answer_challenge(&challenge, keys.secret.as_ref()).await?;
                recv_message(self.transport).await?
            }
            other => other,
        };
        match reply {
            Message::Manifest(remote) if &remote.device_id == peer_id => Ok(remote),
            Message::Manifest(remote) => Err(SyncError::SecurityViolation(format!(
                "expected manifest from {}, got {}",
                peer_id, remote.device_id
            ))),
            Message::Bye(bye) => Err(peer_refusal(peer_id, bye.reason.as_deref())),
            other => Err(unexpected("Manifest", &other)),
        }
    }

    async fn answer_challenge(
        &self,
        challenge: &Challenge,
        secret: Option<&PairingSecret>,
    ) -> Result<(), SyncError> {
        let secret = secret.ok_or_else(|| {
            SyncError::SecurityViolation(format!(
                "{} asked for a session proof but no pairing secret is shared",
                self.device.device_id
            ))
        })?;
        let response = ChallengeResponse {
            proof: session_proof(secret, &challenge.nonce),
        };
        send_message(self.transport, &Message::ChallengeResponse(response)).await?;
        Ok(())
    }

    async fn transfer(
        &mut self,
        plan: &TransferPlan,
        start: u32,
        keys: &PeerKeys,
    ) -> Result<Outcome, SyncError> {
        let config = self.config();
        let remaining = plan.remaining_from(start);
        let mut batches = BatchTracker::resume(
            config.batch_size,
            self.session.completed_items,
            self.session.batch_count,
        )
        .map_err(|e| SyncError::InvalidData(e.to_string()))?;
        let batch_len = batches.batch_size() as usize;

        let mut buffer = PayloadBuffer::default();
        if !config.streaming {
            self.prepare(&mut buffer, remaining, keys).await?;
        }

        for (position, item) in remaining.iter().enumerate() {
            if config.streaming && position % batch_len == 0 {
                buffer.clear();
                let end = (position + batch_len).min(remaining.len());
                self.prepare(&mut buffer, &remaining[position..end], keys)
                    .await?;
            }

            if self.cancel.load(Ordering::SeqCst) {
                info!(device_id = %self.device.device_id, index = item.index, "sync cancelled");
                self.say_goodbye("CANCELLED").await;
                return Ok(Outcome::Cancelled);
            }
            self.check_timeout(position as u32)?;
            if !config.transfer_delay().is_zero() {
                tokio::time::sleep(config.transfer_delay()).await;
            }

            match self.transfer_with_retries(item, &buffer, keys).await? {
                Some(bytes) => {
                    self.session.completed_items += 1;
                    self.session.bytes_transferred += bytes;
                    batches.record_success();
                    self.session.batch_count = batches.batch_count();
                    self.progress.advance();
                    self.current_item = Some(item.item_id.clone());
                    self.engine
                        .controller
                        .update_progress(
                            self.progress.percentage(),
                            Some(&item.item_id),
                            item.index,
                            self.session.total_items,
                        )
                        .await;
                    self.fire(SessionEvent::ItemCompleted).await;
                }
                None => self.session.failed_items += 1,
            }
            self.cursor.commit(item.index);

            if let Some(ready) = batches.record_processed(item.index) {
                self.commit_batch(ready).await?;
            }
        }

        if let Some(ready) = batches.flush() {
            self.commit_batch(ready).await?;
        }
        if let Err(e) = send_message(self.transport, &Message::Bye(Bye { reason: None })).await {
            debug!(error = %e, "peer left before goodbye");
        }
        Ok(Outcome::Finished)
    }

    /// Serialize (and encrypt) the outgoing items among `items`.
    async fn prepare(
        &mut self,
        buffer: &mut PayloadBuffer,
        items: &[PlannedItem],
        keys: &PeerKeys,
    ) -> Result<(), SyncError> {
        for item in items.iter().filter(|i| i.direction == Direction::Send) {
            match self.engine.library.get_item(&item.item_id).await? {
                Some(book) => buffer.insert(encode_book(&book, item.index, keys.payload_key())?),
                None => debug!(item_id = %item.item_id, "planned item left the library"),
            }
        }
        self.memory.sample(buffer.bytes());
        Ok(())
    }

    /// `position` counts items already handled by this session, not plan
    /// indices; a resumed session starts again at zero.
    fn check_timeout(&self, position: u32) -> Result<(), SyncError> {
        let config = self.config();
        let budget = config.session_timeout();
        let projected = config.transfer_delay().saturating_mul(position.saturating_add(1));
        if projected > budget || self.started.elapsed() > budget {
            warn!(
                device_id = %self.device.device_id,
                position,
                projected_ms = projected.as_millis() as u64,
                "session time budget exceeded"
            );
            return Err(SyncError::timeout("sync session"));
        }
        Ok(())
    }

    /// `Some(bytes)` on success, `None` once the retry budget is spent.
    async fn transfer_with_retries(
        &mut self,
        item: &PlannedItem,
        buffer: &PayloadBuffer,
        keys: &PeerKeys,
    ) -> Result<Option<u64>, SyncError> {
        let config = self.config();
        for attempt in 0..=config.item_failure_budget {
            if attempt > 0 {
                self.session.retry_count += 1;
                tokio::time::sleep(config.item_retry_delay()).await;
            }
            match self.transfer_item(item, buffer, keys).await {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(ItemError::Item(e)) => {
                    debug!(item_id = %item.item_id, attempt, error = %e, "item attempt failed")
                }
                Err(ItemError::Session(e)) => return Err(e),
            }
        }
        warn!(
            device_id = %self.device.device_id,
            item_id = %item.item_id,
            budget = config.item_failure_budget,
            "item failed permanently"
        );
        Ok(None)
    }

    async fn transfer_item(
        &self,
        item: &PlannedItem,
        buffer: &PayloadBuffer,
        keys: &PeerKeys,
    ) -> Result<u64, ItemError> {
        match item.direction {
            Direction::Send => {
                let payload = buffer.get(item.index).ok_or_else(|| {
                    ItemError::Item(SyncError::InvalidData(format!(
                        "{} is not in the local library",
                        item.item_id
                    )))
                })?;
                send_message(self.transport, &Message::Item(payload.clone())).await?;
                match recv_message(self.transport).await? {
                    Message::ItemAck(ack) if ack.item_id == item.item_id && ack.accepted => {
                        Ok(payload.payload.len() as u64)
                    }
                    Message::ItemAck(ack) if ack.item_id == item.item_id => {
                        Err(ItemError::Item(SyncError::Protocol(format!(
                            "peer refused {}: {}",
                            item.item_id,
                            ack.reason.unwrap_or_default()
                        ))))
                    }
                    other => Err(ItemError::Session(unexpected("ItemAck", &other))),
                }
            }
            Direction::Receive => {
                let fetch = Fetch {
                    item_id: item.item_id.clone(),
                    index: item.index,
                };
                send_message(self.transport, &Message::Fetch(fetch)).await?;
                match recv_message(self.transport).await? {
                    Message::Item(payload) if payload.item_id == item.item_id => {
                        if keys.encrypts() && !payload.is_encrypted() {
                            return Err(ItemError::Session(SyncError::SecurityViolation(format!(
                                "{} arrived unencrypted",
                                item.item_id
                            ))));
                        }
                        let book = decode_book(&payload, keys.payload_key()).map_err(|e| {
                            if e.kind().is_security() {
                                ItemError::Session(e)
                            } else {
                                ItemError::Item(e)
                            }
                        })?;
                        self.engine
                            .library
                            .apply_remote_item(book)
                            .await
                            .map_err(ItemError::Item)?;
                        Ok(payload.payload.len() as u64)
                    }
                    Message::ItemAck(ack) if ack.item_id == item.item_id && !ack.accepted => {
                        Err(ItemError::Item(SyncError::InvalidData(format!(
                            "peer could not provide {}: {}",
                            item.item_id,
                            ack.reason.unwrap_or_default()
                        ))))
                    }
                    other => Err(ItemError::Session(unexpected("Item", &other))),
                }
            }
        }
    }

    async fn commit_batch(&mut self, ready: BatchReady) -> Result<(), SyncError> {
        let commit = BatchCommit {
            batch_index: ready.batch_index,
            items: ready.indices.len() as u32,
        };
        send_message(self.transport, &Message::BatchCommit(commit)).await?;
        match recv_message(self.transport).await? {
            Message::BatchAck(ack) if ack.batch_index == ready.batch_index => {
                debug!(device_id = %self.device.device_id, batch = ready.batch_index, items = ready.indices.len(), "batch committed");
                Ok(())
            }
            other => Err(unexpected("BatchAck", &other)),
        }
    }

    async fn say_goodbye(&self, reason: &str) {
        let bye = Message::Bye(Bye {
            reason: Some(reason.to_string()),
        });
        if let Err(e) = send_message(self.transport, &bye).await {
            debug!(error = %e, "goodbye not delivered");
        }
    }

    /// Record the outcome, run the final lifecycle actions and return the
    /// terminal session with the error that ended it, if any.
    async fn finish(
        &mut self,
        outcome: Result<Outcome, SyncError>,
    ) -> (SyncSession, Option<SyncError>) {
        let now = self.engine.clock.now_ms();
        self.session.completion_time = Some(now);
        self.session.memory = self.memory.usage();

        let mut failure = None;
        let event = match outcome {
            Ok(Outcome::Finished) => {
                self.progress.finish();
                if let Err(e) = self.engine.trust.record_sync(&self.device.device_id, now).await {
                    warn!(device_id = %self.device.device_id, error = %e, "could not record sync time");
                }
                info!(
                    device_id = %self.device.device_id,
                    completed = self.session.completed_items,
                    failed = self.session.failed_items,
                    retries = self.session.retry_count,
                    bytes = self.session.bytes_transferred,
                    "sync finished"
                );
                SessionEvent::Finished {
                    failed: self.session.failed_items,
                }
            }
            Ok(Outcome::Cancelled) => SessionEvent::Cancelled,
            Err(error) => {
                let report = error.report();
                let resumable = error.kind().is_transient() && self.plan.is_some();
                warn!(device_id = %self.device.device_id, error = %error, resumable, "sync failed");
                if error.kind() == SyncErrorKind::Timeout {
                    self.say_goodbye("TIMEOUT").await;
                }
                self.session.error = Some(report.clone());
                failure = Some(error);
                SessionEvent::Aborted {
                    error: report,
                    resumable,
                }
            }
        };
        self.fire(event).await;
        (self.session.clone(), failure)
    }

    /// Feed the state machine and execute what it asks for.
    async fn fire(&mut self, event: SessionEvent) {
        let (state, actions) = std::mem::take(&mut self.state).on_event(event);
        self.state = state;
        self.session.status = self.state.status();

        let engine = self.engine;
        let peer_id = &self.device.device_id;
        let name = self.device.device_name.as_str();
        for action in actions {
            match action {
                SessionAction::StartService => engine.controller.start_service(name).await,
                SessionAction::StopService => engine.controller.stop_service().await,
                SessionAction::PublishProgress => engine.publish(self.snapshot()),
                SessionAction::SaveResumePoint => {
                    if let Some(point) = self.resume_point() {
                        debug!(device_id = %peer_id, next = point.next_index, "resume point saved");
                        engine.resume_points.insert(peer_id.clone(), point);
                    }
                }
                SessionAction::ClearResumePoint => {
                    engine.resume_points.remove(peer_id);
                }
                SessionAction::NotifyCompletion => {
                    engine
                        .controller
                        .show_completion_notification(
                            name,
                            self.session.completed_items,
                            self.session.duration_ms().unwrap_or(0),
                        )
                        .await
                }
                SessionAction::NotifyError(report) => {
                    engine
                        .controller
                        .show_error_notification(
                            Some(name),
                            &report.message,
                            report.suggestion.as_deref(),
                        )
                        .await
                }
            }
        }
    }

    fn snapshot(&self) -> SyncProgress {
        SyncProgress {
            device_id: self.device.device_id.clone(),
            status: self.state.status(),
            total_items: self.session.total_items,
            completed_items: self.session.completed_items,
            progress_percentage: self.progress.percentage(),
            current_item: self.current_item.clone(),
            error: self.session.error.clone(),
        }
    }

    fn resume_point(&self) -> Option<ResumePoint> {
        let plan = self.plan.clone()?;
        Some(ResumePoint {
            plan,
            next_index: self.cursor.next_index(),
            completed_items: self.session.completed_items,
            failed_items: self.session.failed_items,
            retry_count: self.session.retry_count,
            batch_count: self.session.batch_count,
            bytes_transferred: self.session.bytes_transferred,
        })
    }
}

fn unexpected(expected: &str, got: &Message) -> SyncError {
    SyncError::Protocol(format!("expected {}, got {}", expected, got.name()))
}

/// Map the reason of a peer's `Bye` during the manifest exchange.
fn peer_refusal(device_id: &DeviceId, reason: Option<&str>) -> SyncError {
    match reason {
        Some("NOT_PAIRED") => SyncError::NotPaired(device_id.clone()),
        Some("TRUST_EXPIRED") => SyncError::TrustExpired(device_id.clone()),
        Some("SECURITY_VIOLATION") => {
            SyncError::SecurityViolation(format!("{} refused the session", device_id))
        }
        other => SyncError::Protocol(format!(
            "{} closed the session: {}",
            device_id,
            other.unwrap_or("no reason")
        )),
    }
}
