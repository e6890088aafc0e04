//! Typed crypto failures
//!
//! Verification and decryption signal failure through these values; nothing
//! in this crate panics on malformed input.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("invalid Ed25519 public key encoding")]
    InvalidPublicKey,

    #[error("invalid signature length: expected {expected} bytes, got {got}")]
    InvalidSignatureLength { expected: usize, got: usize },

    #[error("invalid nonce length: expected {expected} bytes, got {got}")]
    InvalidNonceLength { expected: usize, got: usize },

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),
}
