//! Cryptographic primitives for shelf-sync.
//!
//! This module provides:
//! - Argon2id derivation of the [`PairingSecret`] from the PIN and both
//!   device ids
//! - The pairing proof sent on the wire (never the PIN or the secret)
//! - The session proof answering a responder's per-session challenge
//! - [`PayloadKey`]: XChaCha20-Poly1305 encryption of library items
//!
//! # Security Notes
//!
//! - XChaCha20 uses 192-bit nonces (24 bytes), safe for random generation
//! - Proof and payload keys are separate HKDF-SHA256 expansions of the secret
//! - A PIN is a low-entropy secret: the proof only stops an online guesser,
//!   which is why attempts are limited

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use sync_core::constant_time_eq;
use sync_types::{DeviceId, PairingSecret};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
}

/// Argon2id cost parameters for the PIN proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofParams {
    memory_kib: u32,
    iterations: u32,
}

impl ProofParams {
    /// Create parameters. Values below Argon2's minimums are raised.
    pub fn new(memory_kib: u32, iterations: u32) -> Self {
        Self {
            memory_kib: memory_kib.max(Params::MIN_M_COST),
            iterations: iterations.max(Params::MIN_T_COST),
        }
    }

    /// Memory cost in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(self.memory_kib, self.iterations, 1, Some(KEY_SIZE))
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for ProofParams {
    fn default() -> Self {
        Self::new(19 * 1024, 2)
    }
}

/// Salt binding the secret to the unordered pair of devices.
fn pair_salt(a: &DeviceId, b: &DeviceId) -> [u8; 32] {
    let (first, second) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(b"shelf-sync-pairing-v1");
    hasher.update((first.as_str().len() as u64).to_be_bytes());
    hasher.update(first.as_str().as_bytes());
    hasher.update(second.as_str().as_bytes());
    hasher.finalize().into()
}

/// Derive the pairing secret both peers share after a correct PIN.
///
/// Symmetric in the device ids, so initiator and responder agree.
pub fn derive_pairing_secret(
    pin: &str,
    a: &DeviceId,
    b: &DeviceId,
    params: ProofParams,
) -> Result<PairingSecret, CryptoError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);
    let salt = pair_salt(a, b);

    let mut output = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(pin.trim().as_bytes(), &salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let secret = PairingSecret::from_bytes(output);
    output.zeroize();
    Ok(secret)
}

/// Wire proof that the sender knows the PIN.
pub fn pairing_proof(secret: &PairingSecret) -> Vec<u8> {
    let mut proof = [0u8; KEY_SIZE];
    expand(secret, b"pairing-proof", &mut proof);
    proof.to_vec()
}

/// Check a presented proof in constant time.
pub fn verify_proof(secret: &PairingSecret, presented: &[u8]) -> bool {
    constant_time_eq(&pairing_proof(secret), presented)
}

/// Fresh nonce for a session challenge.
pub fn challenge_nonce() -> Vec<u8> {
    let mut nonce = [0u8; KEY_SIZE];
    getrandom::getrandom(&mut nonce).expect("getrandom failed");
    nonce.to_vec()
}

/// Answer to a session challenge: binds the pairing secret to `nonce`.
pub fn session_proof(secret: &PairingSecret, nonce: &[u8]) -> Vec<u8> {
    let mut info = b"session-proof".to_vec();
    info.extend_from_slice(nonce);
    let mut proof = [0u8; KEY_SIZE];
    expand(secret, &info, &mut proof);
    proof.to_vec()
}

/// Check a session proof in constant time.
pub fn verify_session_proof(secret: &PairingSecret, nonce: &[u8], presented: &[u8]) -> bool {
    constant_time_eq(&session_proof(secret, nonce), presented)
}

fn expand(secret: &PairingSecret, info: &[u8], out: &mut [u8; KEY_SIZE]) {
    let hkdf = Hkdf::<Sha256>::new(Some(b"shelf-sync-keys-v1"), secret.as_bytes());
    // 32 bytes is far below the HKDF-SHA256 output limit.
    hkdf.expand(info, out).expect("hkdf expand failed");
}

/// Per-peer key for item payloads.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PayloadKey([u8; KEY_SIZE]);

impl PayloadKey {
    /// Derive the payload key from a pairing secret.
    pub fn derive(secret: &PairingSecret) -> Self {
        let mut key = [0u8; KEY_SIZE];
        expand(secret, b"payload-encryption", &mut key);
        Self(key)
    }

    /// Encrypt data using XChaCha20-Poly1305.
    ///
    /// Returns (ciphertext, nonce). Nonce is 192 bits (24 bytes),
    /// safe for random generation without coordination.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).expect("getrandom failed");
        let nonce = XNonce::from_slice(&nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        Ok((ciphertext, nonce_bytes))
    }

    /// Decrypt data using XChaCha20-Poly1305.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = XNonce::from_slice(nonce);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PayloadKey([REDACTED])")
    }
}
