//! Protocol messages for shelf-sync.
//!
//! These are the payloads carried inside a [`Frame`](crate::Frame).

use serde::{Deserialize, Serialize};

use crate::{DeviceInfo, Fingerprint, FrameType, Manifest, SyncError};

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Presence announcement (UDP discovery)
    Announce(Announce),
    /// Start of a PIN handshake
    PairRequest(PairRequest),
    /// Answer to a PIN handshake
    PairResponse(PairResponse),
    /// Proof-of-secret request before the manifest is answered
    Challenge(Challenge),
    /// Answer to a [`Challenge`]
    ChallengeResponse(ChallengeResponse),
    /// Library manifest
    Manifest(Manifest),
    /// One library item
    Item(ItemPayload),
    /// Acknowledge (or refuse) a pushed item
    ItemAck(ItemAck),
    /// Ask the peer for one item
    Fetch(Fetch),
    /// Close a batch
    BatchCommit(BatchCommit),
    /// Acknowledge a batch
    BatchAck(BatchAck),
    /// Graceful disconnect
    Bye(Bye),
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Frame type this message travels under.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Message::Announce(_) => FrameType::Announce,
            Message::Manifest(_) => FrameType::Manifest,
            Message::Item(_) | Message::Fetch(_) => FrameType::Data,
            Message::PairRequest(_)
            | Message::PairResponse(_)
            | Message::Challenge(_)
            | Message::ChallengeResponse(_)
            | Message::ItemAck(_)
            | Message::BatchCommit(_)
            | Message::BatchAck(_)
            | Message::Bye(_) => FrameType::Control,
        }
    }

    /// Short name for logs and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Announce(_) => "Announce",
            Message::PairRequest(_) => "PairRequest",
            Message::PairResponse(_) => "PairResponse",
            Message::Challenge(_) => "Challenge",
            Message::ChallengeResponse(_) => "ChallengeResponse",
            Message::Manifest(_) => "Manifest",
            Message::Item(_) => "Item",
            Message::ItemAck(_) => "ItemAck",
            Message::Fetch(_) => "Fetch",
            Message::BatchCommit(_) => "BatchCommit",
            Message::BatchAck(_) => "BatchAck",
            Message::Bye(_) => "Bye",
        }
    }
}

/// Presence announcement broadcast on the LAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    /// Protocol version (currently 1)
    pub version: u8,
    /// The announcing device
    pub device: DeviceInfo,
}

/// Sent by the initiator of a pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRequest {
    /// Protocol version (currently 1)
    pub version: u8,
    /// The initiating device
    pub device: DeviceInfo,
    /// Initiator's certificate fingerprint
    pub certificate: Fingerprint,
    /// PIN-derived authentication value (never the PIN itself)
    pub proof: Vec<u8>,
}

/// Answer to a [`PairRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairResponse {
    /// Whether the proof matched the responder's PIN
    pub accepted: bool,
    /// Responder's certificate fingerprint (present when accepted)
    pub certificate: Option<Fingerprint>,
    /// Why the request was refused
    pub reason: Option<String>,
}

/// Sent by a responder to a peer whose trust record carries a pairing
/// secret. The session only opens once the peer proves it holds the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Fresh random bytes, never reused
    pub nonce: Vec<u8>,
}

/// Answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Secret-keyed digest of the nonce
    pub proof: Vec<u8>,
}

/// One library item on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPayload {
    /// Item id
    pub item_id: String,
    /// Position in the sender's transfer plan
    pub index: u32,
    /// XChaCha20-Poly1305 nonce when `payload` is encrypted
    pub nonce: Option<[u8; 24]>,
    /// Gzip-compressed MessagePack book, encrypted when `nonce` is set
    pub payload: Vec<u8>,
}

impl ItemPayload {
    /// Whether the payload is ciphertext.
    pub fn is_encrypted(&self) -> bool {
        self.nonce.is_some()
    }
}

impl std::fmt::Debug for ItemPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPayload")
            .field("item_id", &self.item_id)
            .field("index", &self.index)
            .field("encrypted", &self.is_encrypted())
            .field("payload", &format!("[{} bytes]", self.payload.len()))
            .finish()
    }
}

/// Acknowledge a pushed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAck {
    /// Item id
    pub item_id: String,
    /// Whether the receiver stored the item
    pub accepted: bool,
    /// Why the item was refused
    pub reason: Option<String>,
}

/// Request one item from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fetch {
    /// Item id
    pub item_id: String,
    /// Position in the requester's transfer plan
    pub index: u32,
}

/// Marks the end of a batch of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCommit {
    /// Zero-based batch number
    pub batch_index: u32,
    /// Items exchanged in the batch
    pub items: u32,
}

/// Acknowledge a [`BatchCommit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAck {
    /// Zero-based batch number
    pub batch_index: u32,
}

/// Graceful disconnect message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bye {
    /// Optional reason for disconnect
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceId, DeviceType, ManifestItem, SyncItemType};
    use std::net::{IpAddr, Ipv4Addr};

    fn device() -> DeviceInfo {
        DeviceInfo {
            device_id: DeviceId::new("phone"),
            device_name: "Phone".into(),
            device_type: DeviceType::Android,
            app_version: "2.1.0".into(),
            ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9000,
            last_seen: 42,
        }
    }

    #[test]
    fn announce_roundtrip() {
        let msg = Message::Announce(Announce {
            version: 1,
            device: device(),
        });
        let restored = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn manifest_roundtrip() {
        let msg = Message::Manifest(Manifest {
            device_id: DeviceId::new("phone"),
            timestamp: 7,
            items: vec![ManifestItem {
                item_id: "b1".into(),
                item_type: SyncItemType::Book,
                hash: "abc".into(),
                last_modified: 1,
            }],
        });
        let restored = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn encrypted_item_keeps_nonce() {
        let msg = Message::Item(ItemPayload {
            item_id: "b1".into(),
            index: 3,
            nonce: Some([9u8; 24]),
            payload: vec![1, 2, 3],
        });
        match Message::from_bytes(&msg.to_bytes().unwrap()).unwrap() {
            Message::Item(item) => {
                assert!(item.is_encrypted());
                assert_eq!(item.nonce, Some([9u8; 24]));
                assert_eq!(item.index, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn frame_types_follow_message_kind() {
        let fetch = Message::Fetch(Fetch {
            item_id: "b".into(),
            index: 0,
        });
        assert_eq!(fetch.frame_type(), FrameType::Data);
        let bye = Message::Bye(Bye { reason: None });
        assert_eq!(bye.frame_type(), FrameType::Control);
        assert_eq!(bye.name(), "Bye");
        let challenge = Message::Challenge(Challenge { nonce: vec![1; 32] });
        assert_eq!(challenge.frame_type(), FrameType::Control);
        assert_eq!(challenge.name(), "Challenge");
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let err = Message::from_bytes(&[0xc1, 0x00]).unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn item_debug_hides_payload() {
        let item = ItemPayload {
            item_id: "b1".into(),
            index: 0,
            nonce: None,
            payload: vec![0xAB; 4],
        };
        let debug = format!("{:?}", item);
        assert!(debug.contains("[4 bytes]"));
        assert!(!debug.contains("171"));
    }
}
