//! Device pairing for shelf-sync.
//!
//! This module provides:
//! - [`Pin`]: the short numeric code shown on one device and typed on the other
//! - [`PairingState`]: the pure handshake state machine
//!
//! The handshake:
//! 1. Device A shows a PIN
//! 2. Device B enters it and sends a PIN-derived proof plus its certificate
//! 3. Device A checks the proof and answers with its own certificate
//! 4. Both sides pin the other's certificate fingerprint

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Digits in a generated PIN.
pub const DEFAULT_PIN_LENGTH: usize = 4;

/// Shortest PIN accepted from a user.
pub const MIN_PIN_LENGTH: usize = 4;

/// Longest PIN accepted from a user.
pub const MAX_PIN_LENGTH: usize = 8;

/// Error type for PIN parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    /// The PIN contains something other than ASCII digits.
    NotNumeric,
    /// The PIN is too short or too long.
    InvalidLength(usize),
}

impl std::fmt::Display for PinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinError::NotNumeric => write!(f, "PIN must contain only digits"),
            PinError::InvalidLength(len) => write!(
                f,
                "PIN must be {}-{} digits, got {}",
                MIN_PIN_LENGTH, MAX_PIN_LENGTH, len
            ),
        }
    }
}

impl std::error::Error for PinError {}

/// A numeric pairing PIN.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    /// Parse a PIN typed by a user.
    pub fn parse(value: &str) -> Result<Self, PinError> {
        let value = value.trim();
        if !(MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&value.len()) {
            return Err(PinError::InvalidLength(value.len()));
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PinError::NotNumeric);
        }
        Ok(Self(value.to_string()))
    }

    /// Generate a random PIN of `len` digits (clamped to the valid range).
    pub fn generate(len: usize) -> Self {
        let len = len.clamp(MIN_PIN_LENGTH, MAX_PIN_LENGTH);
        let mut digits = String::with_capacity(len);
        while digits.len() < len {
            let mut byte = [0u8; 1];
            getrandom::getrandom(&mut byte).expect("getrandom failed");
            // Reject 250..=255 so every digit is equally likely.
            if byte[0] < 250 {
                digits.push(char::from(b'0' + byte[0] % 10));
            }
        }
        Self(digits)
    }

    /// Digits as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare with a presented PIN without short-circuiting on content.
    pub fn matches(&self, presented: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), presented.trim().as_bytes())
    }
}

impl PartialEq for Pin {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.as_str())
    }
}

impl Eq for Pin {}

// Intentionally opaque debug to avoid logging PINs
impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pin([REDACTED])")
    }
}

/// Byte comparison whose timing depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Why a handshake ended in [`PairingState::Rejected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Too many failed attempts.
    TooManyAttempts,
    /// Wrong PIN.
    WrongPin,
    /// Presented certificate differs from the pinned one.
    CertificateMismatch,
    /// Handshake I/O failed or timed out.
    HandshakeFailed,
}

/// Pairing handshake state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingState {
    /// Nothing started.
    #[default]
    Idle,
    /// Waiting for the PIN to be verified.
    AwaitingPin,
    /// PIN accepted; checking the peer's certificate against the pin.
    VerifyingCertificate,
    /// Certificate pinned; terminal success.
    Trusted,
    /// Terminal failure.
    Rejected {
        /// Why.
        reason: RejectReason,
    },
}

/// Inputs to the pairing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingEvent {
    /// Handshake started.
    Started,
    /// Attempt limit already reached.
    AttemptsExhausted,
    /// PIN (or peer's check of our proof) succeeded.
    PinAccepted,
    /// PIN was wrong.
    PinRejected,
    /// Certificate is new or matches the pinned one.
    CertificateAccepted,
    /// Certificate differs from the pinned one.
    CertificateMismatch,
    /// I/O failed for good (retries exhausted or timeout).
    HandshakeFailed,
}

impl PairingState {
    /// Process an event and return the new state.
    ///
    /// Invalid transitions leave the state unchanged.
    pub fn on_event(self, event: PairingEvent) -> Self {
        use PairingEvent as E;
        match (self, event) {
            (Self::Idle, E::Started) => Self::AwaitingPin,

            (Self::AwaitingPin, E::AttemptsExhausted) => Self::Rejected {
                reason: RejectReason::TooManyAttempts,
            },
            (Self::AwaitingPin, E::PinAccepted) => Self::VerifyingCertificate,
            (Self::AwaitingPin, E::PinRejected) => Self::Rejected {
                reason: RejectReason::WrongPin,
            },

            (Self::VerifyingCertificate, E::CertificateAccepted) => Self::Trusted,
            (Self::VerifyingCertificate, E::CertificateMismatch) => Self::Rejected {
                reason: RejectReason::CertificateMismatch,
            },

            (Self::AwaitingPin | Self::VerifyingCertificate, E::HandshakeFailed) => {
                Self::Rejected {
                    reason: RejectReason::HandshakeFailed,
                }
            }

            (state, _) => state,
        }
    }

    /// Whether the handshake has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Trusted | Self::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // PIN
    // ===========================================

    #[test]
    fn parse_accepts_digits() {
        let pin = Pin::parse(" 1234 ").unwrap();
        assert_eq!(pin.as_str(), "1234");
    }

    #[test]
    fn parse_rejects_letters() {
        assert_eq!(Pin::parse("12a4").unwrap_err(), PinError::NotNumeric);
    }

    #[test]
    fn parse_rejects_bad_length() {
        assert_eq!(Pin::parse("123").unwrap_err(), PinError::InvalidLength(3));
        assert_eq!(
            Pin::parse("123456789").unwrap_err(),
            PinError::InvalidLength(9)
        );
    }

    #[test]
    fn generated_pin_is_numeric() {
        for _ in 0..50 {
            let pin = Pin::generate(DEFAULT_PIN_LENGTH);
            assert_eq!(pin.as_str().len(), 4);
            assert!(Pin::parse(pin.as_str()).is_ok());
        }
    }

    #[test]
    fn generated_length_is_clamped() {
        assert_eq!(Pin::generate(1).as_str().len(), MIN_PIN_LENGTH);
        assert_eq!(Pin::generate(99).as_str().len(), MAX_PIN_LENGTH);
    }

    #[test]
    fn matches_is_exact() {
        let pin = Pin::parse("1234").unwrap();
        assert!(pin.matches("1234"));
        assert!(!pin.matches("0000"));
        assert!(!pin.matches("12345"));
    }

    #[test]
    fn pin_debug_is_redacted() {
        let pin = Pin::parse("1234").unwrap();
        assert!(!format!("{:?}", pin).contains("1234"));
    }

    #[test]
    fn constant_time_eq_checks_length() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    // ===========================================
    // State machine
    // ===========================================

    #[test]
    fn happy_path_reaches_trusted() {
        let state = PairingState::default()
            .on_event(PairingEvent::Started)
            .on_event(PairingEvent::PinAccepted)
            .on_event(PairingEvent::CertificateAccepted);
        assert_eq!(state, PairingState::Trusted);
        assert!(state.is_terminal());
    }

    #[test]
    fn wrong_pin_is_rejected() {
        let state = PairingState::Idle
            .on_event(PairingEvent::Started)
            .on_event(PairingEvent::PinRejected);
        assert_eq!(
            state,
            PairingState::Rejected {
                reason: RejectReason::WrongPin
            }
        );
    }

    #[test]
    fn exhausted_attempts_reject_before_pin() {
        let state = PairingState::Idle
            .on_event(PairingEvent::Started)
            .on_event(PairingEvent::AttemptsExhausted);
        assert_eq!(
            state,
            PairingState::Rejected {
                reason: RejectReason::TooManyAttempts
            }
        );
    }

    #[test]
    fn certificate_mismatch_is_rejected() {
        let state = PairingState::Idle
            .on_event(PairingEvent::Started)
            .on_event(PairingEvent::PinAccepted)
            .on_event(PairingEvent::CertificateMismatch);
        assert_eq!(
            state,
            PairingState::Rejected {
                reason: RejectReason::CertificateMismatch
            }
        );
    }

    #[test]
    fn certificate_cannot_be_accepted_before_pin() {
        let state = PairingState::Idle
            .on_event(PairingEvent::Started)
            .on_event(PairingEvent::CertificateAccepted);
        assert_eq!(state, PairingState::AwaitingPin);
    }

    #[test]
    fn terminal_states_ignore_events() {
        let trusted = PairingState::Trusted;
        assert_eq!(trusted.on_event(PairingEvent::PinRejected), trusted);
        let rejected = PairingState::Rejected {
            reason: RejectReason::WrongPin,
        };
        assert_eq!(rejected.on_event(PairingEvent::PinAccepted), rejected);
    }

    #[test]
    fn handshake_failure_from_any_active_state() {
        let awaiting = PairingState::AwaitingPin.on_event(PairingEvent::HandshakeFailed);
        let verifying =
            PairingState::VerifyingCertificate.on_event(PairingEvent::HandshakeFailed);
        for state in [awaiting, verifying] {
            assert_eq!(
                state,
                PairingState::Rejected {
                    reason: RejectReason::HandshakeFailed
                }
            );
        }
    }
}
