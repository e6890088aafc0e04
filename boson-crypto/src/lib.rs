//! Boson cryptography foundation
//!
//! Ed25519 signing identities and Curve25519 sealed boxes for the Boson
//! DHT. Node identifiers are Ed25519 public keys; the same key material is
//! converted to X25519 for record encryption.

pub mod cryptobox;
pub mod error;
pub mod random;
pub mod signature;

pub use cryptobox::{CryptoBox, Nonce, MAC_BYTES, NONCE_BYTES};
pub use error::CryptoError;
pub use signature::{KeyPair, PrivateKey, PublicKey, Signature, PUBLIC_KEY_BYTES, SIGNATURE_BYTES};
