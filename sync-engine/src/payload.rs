//! Item payload encoding.
//!
//! Books travel as gzip-compressed named-field MessagePack, encrypted
//! with the peer's [`PayloadKey`] when one is supplied. Compression runs
//! before encryption; ciphertext does not compress.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};
use sync_types::{ItemPayload, SyncError, SyncableBook};

use crate::crypto::PayloadKey;

/// Largest decompressed book accepted from a peer.
const MAX_BOOK_BYTES: u64 = 64 * 1024 * 1024;

/// Serialize `book` for plan position `index`.
pub fn encode_book(
    book: &SyncableBook,
    index: u32,
    key: Option<&PayloadKey>,
) -> Result<ItemPayload, SyncError> {
    let packed =
        rmp_serde::to_vec_named(book).map_err(|e| SyncError::Serialization(e.to_string()))?;
    let plain = compress(&packed)?;
    let (payload, nonce) = match key {
        Some(key) => {
            let (ciphertext, nonce) = key.encrypt(&plain)?;
            (ciphertext, Some(nonce))
        }
        None => (plain, None),
    };
    Ok(ItemPayload {
        item_id: book.id.clone(),
        index,
        nonce,
        payload,
    })
}

/// Decrypt (when needed), deserialize and validate a received item.
pub fn decode_book(item: &ItemPayload, key: Option<&PayloadKey>) -> Result<SyncableBook, SyncError> {
    let plain = match (&item.nonce, key) {
        (Some(nonce), Some(key)) => key.decrypt(&item.payload, nonce)?,
        (Some(_), None) => {
            return Err(SyncError::SecurityViolation(format!(
                "item {} is encrypted but no key is shared with the sender",
                item.item_id
            )))
        }
        (None, _) => item.payload.clone(),
    };
    let packed = decompress(&plain)?;
    let book: SyncableBook =
        rmp_serde::from_slice(&packed).map_err(|e| SyncError::InvalidData(e.to_string()))?;
    if book.id != item.item_id {
        return Err(SyncError::InvalidData(format!(
            "payload for {} carries book {}",
            item.item_id, book.id
        )));
    }
    book.validate()?;
    Ok(book)
}

fn compress(data: &[u8]) -> Result<Vec<u8>, SyncError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SyncError::Serialization(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| SyncError::Serialization(e.to_string()))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, SyncError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_BOOK_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(|e| SyncError::InvalidData(format!("corrupt compressed payload: {}", e)))?;
    if out.len() as u64 > MAX_BOOK_BYTES {
        return Err(SyncError::InvalidData(format!(
            "payload inflates beyond {} bytes",
            MAX_BOOK_BYTES
        )));
    }
    Ok(out)
}

/// Outgoing payloads prepared ahead of sending, keyed by plan index.
#[derive(Debug, Default)]
pub(crate) struct PayloadBuffer {
    payloads: HashMap<u32, ItemPayload>,
    bytes: u64,
}

impl PayloadBuffer {
    pub(crate) fn insert(&mut self, payload: ItemPayload) {
        self.bytes += payload.payload.len() as u64;
        if let Some(old) = self.payloads.insert(payload.index, payload) {
            self.bytes -= old.payload.len() as u64;
        }
    }

    pub(crate) fn get(&self, index: u32) -> Option<&ItemPayload> {
        self.payloads.get(&index)
    }

    pub(crate) fn clear(&mut self) {
        self.payloads.clear();
        self.bytes = 0;
    }

    /// Bytes currently buffered.
    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{PairingSecret, SyncableChapter};

    fn book() -> SyncableBook {
        SyncableBook {
            id: "b1".into(),
            title: "Persuasion".into(),
            author: "Jane Austen".into(),
            last_modified: 5,
            cover_url: Some("https://example.org/cover.jpg".into()),
            chapters: vec![SyncableChapter {
                id: "c1".into(),
                book_id: "b1".into(),
                title: "Chapter 1".into(),
                content: "Sir Walter Elliot, of Kellynch Hall...".into(),
                index: 0,
            }],
        }
    }

    fn key(byte: u8) -> PayloadKey {
        PayloadKey::derive(&PairingSecret::from_bytes([byte; 32]))
    }

    #[test]
    fn encrypted_item_decodes_with_same_key() {
        let key = key(1);
        let item = encode_book(&book(), 4, Some(&key)).unwrap();
        assert!(item.is_encrypted());
        assert_eq!(item.index, 4);
        assert_eq!(decode_book(&item, Some(&key)).unwrap(), book());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let item = encode_book(&book(), 0, Some(&key(1))).unwrap();
        let err = decode_book(&item, Some(&key(2))).unwrap_err();
        assert!(matches!(err, SyncError::InvalidData(_)));
    }

    #[test]
    fn encrypted_item_without_key_is_a_security_violation() {
        let item = encode_book(&book(), 0, Some(&key(1))).unwrap();
        let err = decode_book(&item, None).unwrap_err();
        assert!(matches!(err, SyncError::SecurityViolation(_)));
    }

    #[test]
    fn mislabelled_payload_is_invalid() {
        let mut item = encode_book(&book(), 0, None).unwrap();
        item.item_id = "other".into();
        assert!(matches!(
            decode_book(&item, None).unwrap_err(),
            SyncError::InvalidData(_)
        ));
    }

    #[test]
    fn payload_is_compressed_before_encryption() {
        let mut long = book();
        long.chapters[0].content = "It is a truth universally acknowledged. ".repeat(200);
        let packed = rmp_serde::to_vec_named(&long).unwrap();

        let plain = encode_book(&long, 0, None).unwrap();
        assert!(plain.payload.len() < packed.len() / 4);

        let key = key(3);
        let sealed = encode_book(&long, 0, Some(&key)).unwrap();
        assert!(sealed.payload.len() < packed.len() / 4);
        assert_eq!(decode_book(&sealed, Some(&key)).unwrap(), long);
    }

    #[test]
    fn uncompressed_payload_is_invalid() {
        let mut item = encode_book(&book(), 0, None).unwrap();
        item.payload = rmp_serde::to_vec_named(&book()).unwrap();
        assert!(matches!(
            decode_book(&item, None).unwrap_err(),
            SyncError::InvalidData(_)
        ));
    }

    #[test]
    fn buffer_tracks_bytes() {
        let mut buffer = PayloadBuffer::default();
        let item = encode_book(&book(), 0, None).unwrap();
        let len = item.payload.len() as u64;
        buffer.insert(item.clone());
        buffer.insert(item);
        assert_eq!(buffer.bytes(), len);
        assert!(buffer.get(0).is_some());
        buffer.clear();
        assert_eq!(buffer.bytes(), 0);
        assert!(buffer.get(0).is_none());
    }
}
