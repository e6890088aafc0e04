//! Curve25519 sealed boxes
//!
//! Record encryption between two Boson identities. The Ed25519 keys are
//! converted to X25519 (Edwards to Montgomery), the shared secret runs
//! through HKDF-SHA256, and the payload is sealed with XChaCha20-Poly1305:
//! 24-byte nonce, 16-byte MAC, matching the record format.
//!
//! A `CryptoBox` is the precomputed context for one remote identity and is
//! what the node's per-remote LRU caches. Contexts hold symmetric key
//! material and are zeroized on drop.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::signature::{KeyPair, PublicKey};

/// Nonce size of the box construction
pub const NONCE_BYTES: usize = 24;
/// Authentication tag size appended to every ciphertext
pub const MAC_BYTES: usize = 16;

const BOX_KDF_INFO: &[u8] = b"boson.cryptobox.v1";

/// 24-byte box nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_BYTES]);

impl Nonce {
    /// Draw a fresh random nonce
    pub fn random() -> Self {
        let mut buf = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut buf);
        Self(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != NONCE_BYTES {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_BYTES,
                got: bytes.len(),
            });
        }
        let mut buf = [0u8; NONCE_BYTES];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_BYTES] {
        &self.0
    }
}

/// Convert an Ed25519 public key to its X25519 form
fn encryption_public(pk: &PublicKey) -> x25519_dalek::PublicKey {
    let montgomery: MontgomeryPoint = pk.verifying_key().to_montgomery();
    x25519_dalek::PublicKey::from(montgomery.to_bytes())
}

/// Convert an Ed25519 seed to its X25519 secret.
///
/// Standard birational map: the scalar half of SHA-512(seed), clamped by
/// the X25519 implementation on use.
fn encryption_secret(kp: &KeyPair) -> StaticSecret {
    let seed = Zeroizing::new(kp.signing_key().to_bytes());
    let digest = Sha512::digest(&*seed);
    let mut scalar = Zeroizing::new([0u8; 32]);
    scalar.copy_from_slice(&digest[..32]);
    StaticSecret::from(*scalar)
}

/// Precomputed encryption context between the local identity and one
/// remote identity
pub struct CryptoBox {
    cipher: XChaCha20Poly1305,
}

impl CryptoBox {
    /// Build the context from the local keypair toward `remote`.
    ///
    /// The construction is symmetric: `new(b_pub, a)` and `new(a_pub, b)`
    /// derive the same key, so either side can open the other's boxes.
    pub fn new(remote: &PublicKey, local: &KeyPair) -> Self {
        let secret = encryption_secret(local);
        let shared = secret.diffie_hellman(&encryption_public(remote));

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(BOX_KDF_INFO, key.as_mut())
            .expect("32 bytes is a valid HKDF-SHA256 output length");

        Self {
            cipher: XChaCha20Poly1305::new(key.as_ref().into()),
        }
    }

    /// Seal `plaintext`; output is ciphertext with the MAC appended
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
            .map_err(|_| CryptoError::Encryption)
    }

    /// Open a sealed payload
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < MAC_BYTES {
            return Err(CryptoError::CiphertextTooShort(ciphertext.len()));
        }
        self.cipher
            .decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CryptoBox(..)")
    }
}
