//! Pairing coordinator.
//!
//! Drives the PIN handshake from both ends:
//! - [`PairingCoordinator::initiate_pairing`] on the device where the user
//!   typed the PIN
//! - [`PairingCoordinator::respond_to_pairing`] on the device showing it
//!
//! Checks run in a fixed order, each with its own failure kind:
//! 1. attempt limit (`TOO_MANY_ATTEMPTS`, no I/O)
//! 2. PIN (`AUTHENTICATION_FAILED`, counts as an attempt)
//! 3. certificate pinning (`CERTIFICATE_MISMATCH`, never retried)
//!
//! Lapsed trust is purged by the lookup and pairing continues as a first
//! pairing. Only transient transport failures are retried, with the
//! shared [`Backoff`].

use dashmap::DashMap;
use std::sync::Arc;
use sync_core::{
    Backoff, PairingEvent, PairingState, Pin, RetryTelemetry,
};
use sync_types::{
    DeviceId, DeviceInfo, Fingerprint, Message, PairRequest, PairResponse, PairedDevice,
    PairingSecret, PairingStatus, SyncError, SyncErrorKind, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};

use crate::config::PairingConfig;
use crate::crypto::{derive_pairing_secret, pairing_proof, verify_proof, ProofParams};
use crate::identity::DeviceIdentity;
use crate::transport::{recv_message, send_message, PeerTransport, TransportError};
use crate::trust::{TrustStatus, TrustStore};

/// Reason strings carried in a refused [`PairResponse`].
const REJECT_TOO_MANY_ATTEMPTS: &str = "TOO_MANY_ATTEMPTS";
const REJECT_AUTHENTICATION: &str = "AUTHENTICATION_FAILED";
const REJECT_CERTIFICATE: &str = "CERTIFICATE_MISMATCH";
const REJECT_NO_PIN: &str = "NO_PIN";

/// Runs pairing handshakes and pins the resulting certificates.
pub struct PairingCoordinator {
    identity: DeviceIdentity,
    trust: Arc<dyn TrustStore>,
    config: PairingConfig,
    backoff: Backoff,
    attempts: DashMap<DeviceId, u32>,
    telemetry: DashMap<DeviceId, RetryTelemetry>,
}

impl PairingCoordinator {
    /// Create a coordinator for `identity`.
    pub fn new(identity: DeviceIdentity, trust: Arc<dyn TrustStore>, config: PairingConfig) -> Self {
        Self {
            identity,
            trust,
            config,
            backoff: Backoff::default(),
            attempts: DashMap::new(),
            telemetry: DashMap::new(),
        }
    }

    /// Override the handshake retry backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Failed attempts recorded against `device_id`.
    pub fn attempts(&self, device_id: &DeviceId) -> u32 {
        self.attempts.get(device_id).map(|a| *a).unwrap_or(0)
    }

    /// Retries performed by the last handshake with `device_id`.
    pub fn retry_telemetry(&self, device_id: &DeviceId) -> RetryTelemetry {
        self.telemetry
            .get(device_id)
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Pair with `device` using the PIN the user typed.
    ///
    /// Connects `transport` to the device's address if it is not already
    /// connected. The transport is left open for a following sync.
    pub async fn initiate_pairing(
        &self,
        device: &DeviceInfo,
        pin: &str,
        transport: &dyn PeerTransport,
    ) -> Result<PairedDevice, SyncError> {
        let peer_id = &device.device_id;
        let mut state = PairingState::Idle.on_event(PairingEvent::Started);

        let attempts = self.attempts(peer_id);
        if attempts >= self.config.max_pin_attempts {
            state = state.on_event(PairingEvent::AttemptsExhausted);
            warn!(device_id = %peer_id, attempts, ?state, "pairing refused: attempt limit reached");
            return Err(SyncError::TooManyAttempts {
                device_id: peer_id.clone(),
                attempts,
            });
        }

        let pin = match self.check_local_pin(pin) {
            Some(pin) => pin,
            None => {
                state = state.on_event(PairingEvent::PinRejected);
                debug!(device_id = %peer_id, ?state, "wrong PIN");
                return Err(self.record_failed_attempt(peer_id));
            }
        };

        if let TrustStatus::Expired = self.trust.lookup(peer_id).await? {
            info!(device_id = %peer_id, "previous trust expired, pairing afresh");
        }

        let secret = self.derive_secret(&pin, peer_id).await?;
        let request = PairRequest {
            version: PROTOCOL_VERSION,
            device: self.identity.info().clone(),
            certificate: self.identity.fingerprint().clone(),
            proof: pairing_proof(&secret),
        };

        let handshake = self.handshake(device, &request, transport);
        let response = match tokio::time::timeout(self.config.timeout(), handshake).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                state = state.on_event(PairingEvent::HandshakeFailed);
                warn!(device_id = %peer_id, error = %e, ?state, "pairing handshake failed");
                return Err(e);
            }
            Err(_) => {
                state = state.on_event(PairingEvent::HandshakeFailed);
                warn!(device_id = %peer_id, ?state, "pairing handshake timed out");
                return Err(SyncError::timeout("pairing"));
            }
        };

        let certificate = match response {
            PairResponse {
                accepted: true,
                certificate: Some(certificate),
                ..
            } => certificate,
            PairResponse { accepted: true, .. } => {
                return Err(SyncError::Protocol(
                    "pairing accepted without a certificate".into(),
                ))
            }
            PairResponse { reason, .. } => {
                state = state.on_event(PairingEvent::PinRejected);
                debug!(device_id = %peer_id, ?reason, ?state, "peer refused pairing");
                return Err(self.peer_rejection(peer_id, reason.as_deref()));
            }
        };
        state = state.on_event(PairingEvent::PinAccepted);

        if let Err(e) = self
            .trust
            .record_trust(peer_id, &certificate, self.config.trust_ttl_ms, Some(secret))
            .await
        {
            if e.kind() == SyncErrorKind::CertificateMismatch {
                state = state.on_event(PairingEvent::CertificateMismatch);
                warn!(device_id = %peer_id, ?state, "peer presented a different certificate");
            }
            return Err(e);
        }
        state = state.on_event(PairingEvent::CertificateAccepted);

        self.attempts.remove(peer_id);
        info!(device_id = %peer_id, certificate = %certificate, ?state, "device paired");
        Ok(PairedDevice {
            device: device.clone(),
            status: PairingStatus::Paired,
            certificate,
            is_trusted: true,
        })
    }

    /// Answer a pairing request received from a peer.
    ///
    /// Never fails: problems are reported in the response so the peer can
    /// surface them. Storage errors are logged and refused.
    pub async fn respond_to_pairing(&self, request: &PairRequest) -> PairResponse {
        let peer_id = &request.device.device_id;

        if request.version != PROTOCOL_VERSION {
            return refuse("UNSUPPORTED_VERSION");
        }

        let attempts = self.attempts(peer_id);
        if attempts >= self.config.max_pin_attempts {
            warn!(device_id = %peer_id, attempts, "refusing pairing: attempt limit reached");
            return refuse(REJECT_TOO_MANY_ATTEMPTS);
        }

        let Some(pin) = self.config.pin.as_deref().and_then(|p| Pin::parse(p).ok()) else {
            debug!(device_id = %peer_id, "refusing pairing: no PIN configured");
            return refuse(REJECT_NO_PIN);
        };

        let secret = match self.derive_secret(&pin, peer_id).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(device_id = %peer_id, error = %e, "pairing key derivation failed");
                return refuse(REJECT_AUTHENTICATION);
            }
        };
        if !verify_proof(&secret, &request.proof) {
            self.record_failed_attempt(peer_id);
            debug!(device_id = %peer_id, "refusing pairing: wrong PIN");
            return refuse(REJECT_AUTHENTICATION);
        }

        if let Err(e) = self
            .trust
            .record_trust(
                peer_id,
                &request.certificate,
                self.config.trust_ttl_ms,
                Some(secret),
            )
            .await
        {
            warn!(device_id = %peer_id, error = %e, "refusing pairing");
            return refuse(match e.kind() {
                SyncErrorKind::CertificateMismatch => REJECT_CERTIFICATE,
                _ => REJECT_AUTHENTICATION,
            });
        }

        self.attempts.remove(peer_id);
        info!(device_id = %peer_id, "accepted pairing request");
        PairResponse {
            accepted: true,
            certificate: Some(self.identity.fingerprint().clone()),
            reason: None,
        }
    }

    /// Parse the typed PIN and compare it with ours, if we have one.
    fn check_local_pin(&self, presented: &str) -> Option<Pin> {
        let pin = Pin::parse(presented).ok()?;
        match self.config.pin.as_deref() {
            Some(expected) if !pin.matches(expected) => None,
            _ => Some(pin),
        }
    }

    fn record_failed_attempt(&self, device_id: &DeviceId) -> SyncError {
        let mut entry = self.attempts.entry(device_id.clone()).or_insert(0);
        *entry += 1;
        SyncError::AuthenticationFailed {
            device_id: device_id.clone(),
            attempts: *entry,
        }
    }

    fn peer_rejection(&self, device_id: &DeviceId, reason: Option<&str>) -> SyncError {
        match reason {
            Some(REJECT_TOO_MANY_ATTEMPTS) => SyncError::TooManyAttempts {
                device_id: device_id.clone(),
                attempts: self.attempts(device_id),
            },
            Some(REJECT_CERTIFICATE) => SyncError::CertificateMismatch {
                device_id: device_id.clone(),
            },
            _ => self.record_failed_attempt(device_id),
        }
    }

    /// Argon2id is deliberately slow; keep it off the async workers.
    async fn derive_secret(&self, pin: &Pin, peer: &DeviceId) -> Result<PairingSecret, SyncError> {
        let pin = pin.clone();
        let ours = self.identity.device_id().clone();
        let theirs = peer.clone();
        let params = ProofParams::new(self.config.argon2_memory_kib, self.config.argon2_iterations);
        tokio::task::spawn_blocking(move || {
            derive_pairing_secret(pin.as_str(), &ours, &theirs, params)
        })
        .await
        .map_err(|e| SyncError::SecurityViolation(format!("key derivation aborted: {}", e)))?
        .map_err(SyncError::from)
    }

    async fn handshake(
        &self,
        device: &DeviceInfo,
        request: &PairRequest,
        transport: &dyn PeerTransport,
    ) -> Result<PairResponse, SyncError> {
        let peer_id = &device.device_id;
        let mut telemetry = RetryTelemetry::default();
        let mut retry = 0;

        let result = loop {
            match exchange(device, request, transport).await {
                Ok(response) => break Ok(response),
                Err(e) if is_retryable(&e) && retry < self.config.handshake_retries => {
                    retry += 1;
                    let delay = self.backoff.delay(retry);
                    telemetry.record(delay);
                    debug!(device_id = %peer_id, error = %e, retry, ?delay, "retrying pairing handshake");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(SyncError::from(e)),
            }
        };

        self.telemetry.insert(peer_id.clone(), telemetry);
        result
    }
}

async fn exchange(
    device: &DeviceInfo,
    request: &PairRequest,
    transport: &dyn PeerTransport,
) -> Result<PairResponse, TransportError> {
    if !transport.is_connected() {
        transport.connect(&device.socket_addr().to_string()).await?;
    }
    send_message(transport, &Message::PairRequest(request.clone())).await?;
    match recv_message(transport).await? {
        Message::PairResponse(response) => Ok(response),
        other => Err(TransportError::InvalidFrame(SyncError::Protocol(format!(
            "expected PairResponse, got {}",
            other.name()
        )))),
    }
}

fn is_retryable(err: &TransportError) -> bool {
    !matches!(err, TransportError::InvalidFrame(_))
}

fn refuse(reason: &str) -> PairResponse {
    PairResponse {
        accepted: false,
        certificate: None,
        reason: Some(reason.to_string()),
    }
}

/// Fingerprint a peer presented, for logging and CLI output.
pub fn short_fingerprint(fingerprint: &Fingerprint) -> &str {
    let value = fingerprint.as_str();
    let end = (Fingerprint::PREFIX.len() + 16).min(value.len());
    &value[..end]
}
