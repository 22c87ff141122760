//! The passive side of a connection.
//!
//! A [`PeerResponder`] answers whatever an initiating peer asks for on one
//! transport: pairing requests, the manifest exchange, pushed items,
//! fetches and batch commits. Sync traffic is only served to peers that
//! are currently trusted; anything else gets a `Bye` with the reason.
//!
//! A peer whose trust record carries a pairing secret must answer a fresh
//! challenge before its manifest is answered, and every item it pushes
//! must be encrypted. Peers trusted without a secret are taken at their
//! claimed id and may push plaintext.

use std::sync::Arc;
use sync_types::{
    BatchAck, Bye, Challenge, DeviceId, ItemAck, ItemPayload, Manifest, Message, PairResponse,
    SyncError,
};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::crypto::{challenge_nonce, verify_session_proof, PayloadKey};
use crate::error::EngineError;
use crate::identity::DeviceIdentity;
use crate::library::LocalLibrary;
use crate::pairing::PairingCoordinator;
use crate::payload::{decode_book, encode_book};
use crate::transport::{recv_message, send_message, PeerTransport, TransportError};
use crate::trust::{TrustStatus, TrustStore};

/// What happened during one served connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Peer that opened a sync session, if any.
    pub peer: Option<DeviceId>,
    /// Whether a pairing request was accepted.
    pub paired: bool,
    /// Items stored from the peer.
    pub items_received: u32,
    /// Items handed to the peer.
    pub items_sent: u32,
    /// Batch commits acknowledged.
    pub batches: u32,
    /// Why the sync session was refused.
    pub refused: Option<String>,
}

/// Serves pairing and sync requests from remote initiators.
pub struct PeerResponder {
    identity: DeviceIdentity,
    trust: Arc<dyn TrustStore>,
    library: Arc<dyn LocalLibrary>,
    pairing: Option<Arc<PairingCoordinator>>,
    clock: Arc<dyn Clock>,
}

/// Peer admitted by the manifest exchange.
struct Admitted {
    device_id: DeviceId,
    key: Option<PayloadKey>,
}

impl PeerResponder {
    /// Serve sync requests only; pairing requests are refused.
    pub fn new(
        identity: DeviceIdentity,
        trust: Arc<dyn TrustStore>,
        library: Arc<dyn LocalLibrary>,
    ) -> Self {
        Self {
            identity,
            trust,
            library,
            pairing: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Answer pairing requests with `coordinator`.
    pub fn with_pairing(mut self, coordinator: Arc<PairingCoordinator>) -> Self {
        self.pairing = Some(coordinator);
        self
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Serve one connection until the peer says goodbye or hangs up.
    ///
    /// # Errors
    ///
    /// Transport failures other than a clean close, and protocol
    /// violations (sync traffic before the manifest exchange, messages an
    /// initiator never sends).
    pub async fn serve(&self, transport: &dyn PeerTransport) -> Result<ServeSummary, EngineError> {
        let mut summary = ServeSummary::default();
        let mut admitted: Option<Admitted> = None;

        loop {
            let message = match recv_message(transport).await {
                Ok(message) => message,
                Err(TransportError::ConnectionClosed) => {
                    debug!("peer hung up");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            match message {
                Message::PairRequest(request) => {
                    let response = match &self.pairing {
                        Some(coordinator) => coordinator.respond_to_pairing(&request).await,
                        None => PairResponse {
                            accepted: false,
                            certificate: None,
                            reason: Some("PAIRING_DISABLED".into()),
                        },
                    };
                    summary.paired |= response.accepted;
                    send_message(transport, &Message::PairResponse(response)).await?;
                }

                Message::Manifest(remote) => match self.admit(transport, &remote.device_id).await? {
                    Ok(peer) => {
                        let books = self.library.get_local_manifest().await?;
                        let ours = Manifest::from_books(
                            self.identity.device_id().clone(),
                            self.clock.now_ms(),
                            &books,
                        );
                        info!(device_id = %peer.device_id, items = ours.items.len(), "sync session opened");
                        summary.peer = Some(peer.device_id.clone());
                        admitted = Some(peer);
                        send_message(transport, &Message::Manifest(ours)).await?;
                    }
                    Err(reason) => {
                        warn!(device_id = %remote.device_id, reason, "refusing sync");
                        refuse(transport, &mut summary, reason).await;
                        break;
                    }
                },

                Message::Item(payload) => {
                    let peer = require(&admitted, "Item")?;
                    if peer.key.is_some() && !payload.is_encrypted() {
                        warn!(device_id = %peer.device_id, item_id = %payload.item_id, "plaintext item from a peer sharing a secret");
                        refuse(transport, &mut summary, "SECURITY_VIOLATION").await;
                        break;
                    }
                    let ack = self.store(peer, payload).await;
                    if ack.accepted {
                        summary.items_received += 1;
                    }
                    send_message(transport, &Message::ItemAck(ack)).await?;
                }

                Message::Fetch(fetch) => {
                    let peer = require(&admitted, "Fetch")?;
                    let reply = match self.library.get_item(&fetch.item_id).await {
                        Ok(Some(book)) => {
                            match encode_book(&book, fetch.index, peer.key.as_ref()) {
                                Ok(payload) => Message::Item(payload),
                                Err(e) => refusal(&fetch.item_id, &e),
                            }
                        }
                        Ok(None) => Message::ItemAck(ItemAck {
                            item_id: fetch.item_id.clone(),
                            accepted: false,
                            reason: Some("NOT_FOUND".into()),
                        }),
                        Err(e) => refusal(&fetch.item_id, &e),
                    };
                    if matches!(reply, Message::Item(_)) {
                        summary.items_sent += 1;
                    }
                    send_message(transport, &reply).await?;
                }

                Message::BatchCommit(commit) => {
                    require(&admitted, "BatchCommit")?;
                    debug!(batch = commit.batch_index, items = commit.items, "batch committed by peer");
                    summary.batches += 1;
                    let ack = BatchAck {
                        batch_index: commit.batch_index,
                    };
                    send_message(transport, &Message::BatchAck(ack)).await?;
                }

                Message::Bye(bye) => {
                    debug!(reason = ?bye.reason, "peer said goodbye");
                    if let (Some(peer), None) = (&admitted, &bye.reason) {
                        let now = self.clock.now_ms();
                        if let Err(e) = self.trust.record_sync(&peer.device_id, now).await {
                            warn!(device_id = %peer.device_id, error = %e, "could not record sync time");
                        }
                    }
                    break;
                }

                other => {
                    return Err(SyncError::Protocol(format!(
                        "unexpected {} from initiator",
                        other.name()
                    ))
                    .into())
                }
            }
        }

        Ok(summary)
    }

    /// Check trust for a peer opening a sync session, challenging it when
    /// a secret is shared.
    ///
    /// The outer error is a storage or transport failure; the inner one the
    /// refusal reason sent back to the peer.
    async fn admit(
        &self,
        transport: &dyn PeerTransport,
        device_id: &DeviceId,
    ) -> Result<Result<Admitted, &'static str>, EngineError> {
        let record = match self.trust.lookup(device_id).await? {
            TrustStatus::Trusted(record) => record,
            TrustStatus::Expired => return Ok(Err("TRUST_EXPIRED")),
            TrustStatus::Absent => return Ok(Err("NOT_PAIRED")),
        };
        let peer = Admitted {
            device_id: device_id.clone(),
            key: record.secret.as_ref().map(PayloadKey::derive),
        };
        let Some(secret) = record.secret else {
            return Ok(Ok(peer));
        };

        let nonce = challenge_nonce();
        let challenge = Challenge {
            nonce: nonce.clone(),
        };
        send_message(transport, &Message::Challenge(challenge)).await?;
        let verified = match recv_message(transport).await {
            Ok(Message::ChallengeResponse(response)) => {
                verify_session_proof(&secret, &nonce, &response.proof)
            }
            Ok(other) => {
                debug!(device_id = %device_id, got = other.name(), "challenge not answered");
                false
            }
            Err(TransportError::ConnectionClosed) => {
                debug!(device_id = %device_id, "peer hung up on the challenge");
                false
            }
            Err(e) => return Err(e.into()),
        };
        Ok(if verified {
            Ok(peer)
        } else {
            Err("SECURITY_VIOLATION")
        })
    }

    async fn store(&self, peer: &Admitted, payload: ItemPayload) -> ItemAck {
        let item_id = payload.item_id.clone();
        let result = match decode_book(&payload, peer.key.as_ref()) {
            Ok(book) => self.library.apply_remote_item(book).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => ItemAck {
                item_id,
                accepted: true,
                reason: None,
            },
            Err(e) => {
                debug!(device_id = %peer.device_id, %item_id, error = %e, "refused pushed item");
                ItemAck {
                    item_id,
                    accepted: false,
                    reason: Some(e.kind().to_string()),
                }
            }
        }
    }
}

fn require<'a>(admitted: &'a Option<Admitted>, what: &str) -> Result<&'a Admitted, EngineError> {
    admitted.as_ref().ok_or_else(|| {
        SyncError::Protocol(format!("{} before the manifest exchange", what)).into()
    })
}

/// Close the session with `reason`. The peer may already be gone.
async fn refuse(transport: &dyn PeerTransport, summary: &mut ServeSummary, reason: &str) {
    summary.refused = Some(reason.to_string());
    let bye = Bye {
        reason: Some(reason.to_string()),
    };
    if let Err(e) = send_message(transport, &Message::Bye(bye)).await {
        debug!(error = %e, "refusal not delivered");
    }
}

fn refusal(item_id: &str, error: &SyncError) -> Message {
    Message::ItemAck(ItemAck {
        item_id: item_id.to_string(),
        accepted: false,
        reason: Some(error.kind().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::session_proof;
    use crate::library::MemoryLibrary;
    use crate::transport::MemoryTransport;
    use crate::trust::MemoryTrustStore;
    use std::net::{IpAddr, Ipv4Addr};
    use sync_types::{ChallengeResponse, DeviceType, Fetch, PairingSecret, SyncableBook};

    const SECRET: [u8; 32] = [3; 32];

    fn identity(name: &str) -> DeviceIdentity {
        DeviceIdentity::generate(
            name,
            DeviceType::Android,
            "1.0.0",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            8963,
        )
    }

    fn book(id: &str) -> SyncableBook {
        SyncableBook {
            id: id.into(),
            title: format!("Title {}", id),
            author: "Author".into(),
            last_modified: 1,
            cover_url: None,
            chapters: vec![],
        }
    }

    fn manifest_from(id: &DeviceIdentity) -> Message {
        Message::Manifest(Manifest::from_books(id.device_id().clone(), 0, &[]))
    }

    fn key() -> PayloadKey {
        PayloadKey::derive(&PairingSecret::from_bytes(SECRET))
    }

    struct Fixture {
        peer: DeviceIdentity,
        library: MemoryLibrary,
        trust: Arc<MemoryTrustStore>,
        responder: PeerResponder,
    }

    /// A responder that trusts `phone` with `secret`, or not at all.
    async fn setup(trusted: bool, secret: Option<[u8; 32]>) -> Fixture {
        let peer = identity("phone");
        let trust = Arc::new(MemoryTrustStore::new());
        if trusted {
            trust
                .record_trust(
                    peer.device_id(),
                    peer.fingerprint(),
                    None,
                    secret.map(PairingSecret::from_bytes),
                )
                .await
                .unwrap();
        }
        let library = MemoryLibrary::with_books([book("local")]);
        let responder =
            PeerResponder::new(identity("tablet"), trust.clone(), Arc::new(library.clone()));
        Fixture {
            peer,
            library,
            trust,
            responder,
        }
    }

    /// Send our manifest, answer the challenge and read the peer's manifest.
    async fn open_session(local: &MemoryTransport, peer: &DeviceIdentity) -> Manifest {
        send_message(local, &manifest_from(peer)).await.unwrap();
        let nonce = match recv_message(local).await.unwrap() {
            Message::Challenge(challenge) => challenge.nonce,
            other => panic!("unexpected {:?}", other),
        };
        let response = ChallengeResponse {
            proof: session_proof(&PairingSecret::from_bytes(SECRET), &nonce),
        };
        send_message(local, &Message::ChallengeResponse(response))
            .await
            .unwrap();
        match recv_message(local).await.unwrap() {
            Message::Manifest(manifest) => manifest,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn expect_bye(message: Message, reason: &str) {
        match message {
            Message::Bye(bye) => assert_eq!(bye.reason.as_deref(), Some(reason)),
            other => panic!("unexpected {:?}", other),
        }
    }

    // ===========================================
    // Admission
    // ===========================================

    #[tokio::test]
    async fn unknown_peer_gets_not_paired() {
        let f = setup(false, None).await;
        let (local, remote) = MemoryTransport::pair();
        send_message(&local, &manifest_from(&f.peer)).await.unwrap();

        let summary = f.responder.serve(&remote).await.unwrap();
        assert_eq!(summary.refused.as_deref(), Some("NOT_PAIRED"));
        expect_bye(recv_message(&local).await.unwrap(), "NOT_PAIRED");
    }

    #[tokio::test]
    async fn item_before_manifest_is_a_protocol_error() {
        let f = setup(true, Some(SECRET)).await;
        let (local, remote) = MemoryTransport::pair();
        let payload = encode_book(&book("x"), 0, None).unwrap();
        send_message(&local, &Message::Item(payload)).await.unwrap();

        let err = f.responder.serve(&remote).await.unwrap_err();
        assert!(matches!(err, EngineError::Sync(SyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn pairing_is_refused_without_a_coordinator() {
        let f = setup(false, None).await;
        let peer = f.peer.clone();
        let responder = f.responder;
        let (local, remote) = MemoryTransport::pair();
        let server = tokio::spawn(async move { responder.serve(&remote).await });

        let request = sync_types::PairRequest {
            version: sync_types::PROTOCOL_VERSION,
            device: peer.info().clone(),
            certificate: peer.fingerprint().clone(),
            proof: vec![0; 32],
        };
        send_message(&local, &Message::PairRequest(request)).await.unwrap();
        match recv_message(&local).await.unwrap() {
            Message::PairResponse(response) => {
                assert!(!response.accepted);
                assert_eq!(response.reason.as_deref(), Some("PAIRING_DISABLED"));
            }
            other => panic!("unexpected {:?}", other),
        }

        drop(local);
        assert!(!server.await.unwrap().unwrap().paired);
    }

    #[tokio::test]
    async fn claimed_id_with_wrong_proof_is_refused() {
        let f = setup(true, Some(SECRET)).await;
        let (local, remote) = MemoryTransport::pair();
        let library = f.library.clone();
        let responder = f.responder;
        let server = tokio::spawn(async move { responder.serve(&remote).await });

        send_message(&local, &manifest_from(&f.peer)).await.unwrap();
        assert!(matches!(
            recv_message(&local).await.unwrap(),
            Message::Challenge(_)
        ));
        let forged = ChallengeResponse { proof: vec![0; 32] };
        send_message(&local, &Message::ChallengeResponse(forged))
            .await
            .unwrap();
        expect_bye(recv_message(&local).await.unwrap(), "SECURITY_VIOLATION");

        let summary = server.await.unwrap().unwrap();
        assert_eq!(summary.refused.as_deref(), Some("SECURITY_VIOLATION"));
        assert_eq!(summary.peer, None);
        assert_eq!(library.len(), 1);
    }

    #[tokio::test]
    async fn claimed_id_that_skips_the_challenge_is_refused() {
        let f = setup(true, Some(SECRET)).await;
        let (local, remote) = MemoryTransport::pair();
        let library = f.library.clone();
        let responder = f.responder;
        let server = tokio::spawn(async move { responder.serve(&remote).await });

        send_message(&local, &manifest_from(&f.peer)).await.unwrap();
        recv_message(&local).await.unwrap();
        let pushed = encode_book(&book("intruder"), 0, None).unwrap();
        send_message(&local, &Message::Item(pushed)).await.unwrap();
        expect_bye(recv_message(&local).await.unwrap(), "SECURITY_VIOLATION");

        let summary = server.await.unwrap().unwrap();
        assert_eq!(summary.refused.as_deref(), Some("SECURITY_VIOLATION"));
        assert_eq!(summary.items_received, 0);
        assert!(library.get_item("intruder").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peer_trusted_without_secret_is_not_challenged() {
        let f = setup(true, None).await;
        let (local, remote) = MemoryTransport::pair();
        let responder = f.responder;
        let server = tokio::spawn(async move { responder.serve(&remote).await });

        send_message(&local, &manifest_from(&f.peer)).await.unwrap();
        assert!(matches!(
            recv_message(&local).await.unwrap(),
            Message::Manifest(_)
        ));
        let pushed = encode_book(&book("open"), 0, None).unwrap();
        send_message(&local, &Message::Item(pushed)).await.unwrap();
        match recv_message(&local).await.unwrap() {
            Message::ItemAck(ack) => assert!(ack.accepted),
            other => panic!("unexpected {:?}", other),
        }

        drop(local);
        assert_eq!(server.await.unwrap().unwrap().items_received, 1);
    }

    // ===========================================
    // Sync traffic
    // ===========================================

    #[tokio::test]
    async fn trusted_peer_can_push_and_fetch() {
        let f = setup(true, Some(SECRET)).await;
        let key = key();
        let (local, remote) = MemoryTransport::pair();
        let responder = f.responder;
        let server = tokio::spawn(async move { responder.serve(&remote).await });

        assert_eq!(open_session(&local, &f.peer).await.items.len(), 1);

        let pushed = encode_book(&book("new"), 0, Some(&key)).unwrap();
        send_message(&local, &Message::Item(pushed)).await.unwrap();
        match recv_message(&local).await.unwrap() {
            Message::ItemAck(ack) => assert!(ack.accepted),
            other => panic!("unexpected {:?}", other),
        }

        let fetch = Fetch {
            item_id: "local".into(),
            index: 1,
        };
        send_message(&local, &Message::Fetch(fetch)).await.unwrap();
        match recv_message(&local).await.unwrap() {
            Message::Item(item) => {
                assert!(item.is_encrypted());
                assert_eq!(decode_book(&item, Some(&key)).unwrap(), book("local"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let missing = Fetch {
            item_id: "ghost".into(),
            index: 2,
        };
        send_message(&local, &Message::Fetch(missing)).await.unwrap();
        match recv_message(&local).await.unwrap() {
            Message::ItemAck(ack) => {
                assert!(!ack.accepted);
                assert_eq!(ack.reason.as_deref(), Some("NOT_FOUND"));
            }
            other => panic!("unexpected {:?}", other),
        }

        send_message(&local, &Message::Bye(Bye { reason: None }))
            .await
            .unwrap();
        let summary = server.await.unwrap().unwrap();
        assert_eq!(summary.peer.as_ref(), Some(f.peer.device_id()));
        assert_eq!(summary.items_received, 1);
        assert_eq!(summary.items_sent, 1);
        assert_eq!(f.library.len(), 2);
        assert!(f.trust.last_sync(f.peer.device_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn plaintext_push_from_secret_holder_ends_the_session() {
        let f = setup(true, Some(SECRET)).await;
        let (local, remote) = MemoryTransport::pair();
        let responder = f.responder;
        let server = tokio::spawn(async move { responder.serve(&remote).await });

        open_session(&local, &f.peer).await;
        let pushed = encode_book(&book("plain"), 0, None).unwrap();
        send_message(&local, &Message::Item(pushed)).await.unwrap();
        expect_bye(recv_message(&local).await.unwrap(), "SECURITY_VIOLATION");

        let summary = server.await.unwrap().unwrap();
        assert_eq!(summary.refused.as_deref(), Some("SECURITY_VIOLATION"));
        assert_eq!(summary.items_received, 0);
        assert!(f.library.get_item("plain").await.unwrap().is_none());
        assert_eq!(f.trust.last_sync(f.peer.device_id()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_pushed_item_is_refused_not_fatal() {
        let f = setup(true, Some(SECRET)).await;
        let (local, remote) = MemoryTransport::pair();
        let responder = f.responder;
        let server = tokio::spawn(async move { responder.serve(&remote).await });

        open_session(&local, &f.peer).await;

        let mut orphan = book("bad");
        orphan.chapters.push(sync_types::SyncableChapter {
            id: "c1".into(),
            book_id: "someone-else".into(),
            title: "Chapter".into(),
            content: String::new(),
            index: 0,
        });
        let pushed = encode_book(&orphan, 0, Some(&key())).unwrap();
        send_message(&local, &Message::Item(pushed)).await.unwrap();
        match recv_message(&local).await.unwrap() {
            Message::ItemAck(ack) => {
                assert!(!ack.accepted);
                assert_eq!(ack.reason.as_deref(), Some("INVALID_DATA"));
            }
            other => panic!("unexpected {:?}", other),
        }

        drop(local);
        let summary = server.await.unwrap().unwrap();
        assert_eq!(summary.items_received, 0);
        assert_eq!(f.library.len(), 1);
    }
}
