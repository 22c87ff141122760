//! Frame - the length-prefixed wire wrapper for all sync messages.
//!
//! Layout: 4-byte big-endian payload length, 1-byte [`FrameType`], then
//! the MessagePack-encoded [`Message`].

use serde::{Deserialize, Serialize};

use crate::{Message, SyncError};

/// Bytes preceding the payload: length (4) + frame type (1).
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload a peer may announce (16 MiB).
///
/// A book with long chapters fits comfortably; anything larger is treated
/// as a protocol violation rather than allocated.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Discovery announcement
    Announce = 0,
    /// Library manifest
    Manifest = 1,
    /// Item data (push or fetch)
    Data = 2,
    /// Pairing, acknowledgements and session control
    Control = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Announce),
            1 => Ok(FrameType::Manifest),
            2 => Ok(FrameType::Data),
            3 => Ok(FrameType::Control),
            _ => Err(SyncError::Protocol(format!("invalid frame type: {}", value))),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type.
    pub frame_type: FrameType,
    /// Payload length in bytes.
    pub len: usize,
}

impl FrameHeader {
    /// Parse and bound-check a header.
    pub fn parse(bytes: &[u8; FRAME_HEADER_LEN]) -> Result<Self, SyncError> {
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(SyncError::Protocol(format!(
                "frame too large: {} bytes (limit: {})",
                len, MAX_FRAME_SIZE
            )));
        }
        Ok(Self {
            frame_type: FrameType::try_from(bytes[4])?,
            len,
        })
    }
}

/// A message ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// MessagePack payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Wrap a message.
    pub fn from_message(message: &Message) -> Result<Self, SyncError> {
        Ok(Self {
            frame_type: message.frame_type(),
            payload: message.to_bytes()?,
        })
    }

    /// Decode the carried message, checking it matches the frame type.
    pub fn into_message(self) -> Result<Message, SyncError> {
        let message = Message::from_bytes(&self.payload)?;
        if message.frame_type() != self.frame_type {
            return Err(SyncError::Protocol(format!(
                "{} sent in a {:?} frame",
                message.name(),
                self.frame_type
            )));
        }
        Ok(message)
    }

    /// Serialize header + payload.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        if self.payload.len() > MAX_FRAME_SIZE {
            return Err(SyncError::Protocol(format!(
                "frame too large: {} bytes (limit: {})",
                self.payload.len(),
                MAX_FRAME_SIZE
            )));
        }
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.push(self.frame_type as u8);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse one complete frame from `bytes`.
    ///
    /// Trailing bytes are rejected; stream readers should use
    /// [`FrameHeader::parse`] and read exactly `len` bytes instead.
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        let header: &[u8; FRAME_HEADER_LEN] = bytes
            .get(..FRAME_HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| SyncError::Protocol("truncated frame header".into()))?;
        let header = FrameHeader::parse(header)?;
        let body = &bytes[FRAME_HEADER_LEN..];
        if body.len() != header.len {
            return Err(SyncError::Protocol(format!(
                "frame length mismatch: header says {}, got {}",
                header.len,
                body.len()
            )));
        }
        Ok(Self {
            frame_type: header.frame_type,
            payload: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bye, Fetch};

    #[test]
    fn frame_roundtrip() {
        let msg = Message::Fetch(Fetch {
            item_id: "book-1".into(),
            index: 4,
        });
        let bytes = Frame::from_message(&msg).unwrap().encode().unwrap();
        let restored = Frame::decode(&bytes).unwrap().into_message().unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn header_is_big_endian_length_then_type() {
        let frame = Frame {
            frame_type: FrameType::Data,
            payload: vec![0u8; 258],
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[..5], &[0, 0, 1, 2, 2]);
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 258);
    }

    #[test]
    fn frame_type_roundtrip() {
        for val in 0..=3u8 {
            let ft = FrameType::try_from(val).unwrap();
            assert_eq!(ft as u8, val);
        }
    }

    #[test]
    fn invalid_frame_type_fails() {
        assert!(FrameType::try_from(4).is_err());
        assert!(FrameType::try_from(255).is_err());
    }

    #[test]
    fn oversized_header_is_rejected() {
        let header = [0xFF, 0xFF, 0xFF, 0xFF, 2];
        let err = FrameHeader::parse(&header).unwrap_err();
        assert!(err.to_string().contains("frame too large"));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(Frame::decode(&[0, 0]).is_err());
        assert!(Frame::decode(&[0, 0, 0, 9, 3, 1]).is_err());
    }

    #[test]
    fn mismatched_frame_type_is_rejected() {
        let msg = Message::Bye(Bye { reason: None });
        let mut frame = Frame::from_message(&msg).unwrap();
        frame.frame_type = FrameType::Data;
        let err = frame.into_message().unwrap_err();
        assert!(err.to_string().contains("Bye sent in a Data frame"));
    }
}
