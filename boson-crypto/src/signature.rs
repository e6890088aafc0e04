//! Ed25519 signing identities
//!
//! Every Boson node and every record owner is an Ed25519 keypair. The
//! 32-byte public key doubles as the node/record identifier, so the types
//! here are deliberately thin wrappers that keep the raw bytes reachable.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Ed25519 public key size
pub const PUBLIC_KEY_BYTES: usize = 32;
/// Ed25519 seed size
pub const PRIVATE_KEY_BYTES: usize = 32;
/// Ed25519 signature size
pub const SIGNATURE_BYTES: usize = 64;

/// Detached Ed25519 signature
#[derive(Clone, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_BYTES]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIGNATURE_BYTES {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_BYTES,
                got: bytes.len(),
            });
        }
        let mut buf = [0u8; SIGNATURE_BYTES];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_BYTES] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_BYTES] {
        self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Ed25519 verifying key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_BYTES {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_BYTES,
                got: bytes.len(),
            });
        }
        let mut buf = [0u8; PUBLIC_KEY_BYTES];
        buf.copy_from_slice(bytes);
        let key = VerifyingKey::from_bytes(&buf).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        self.key.as_bytes()
    }

    /// Verify a detached signature over `message`
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match ed25519_dalek::Signature::try_from(&signature.0[..]) {
            Ok(sig) => self.key.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }
}

/// Ed25519 seed, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; PRIVATE_KEY_BYTES]);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PRIVATE_KEY_BYTES {
            return Err(CryptoError::InvalidKeyLength {
                expected: PRIVATE_KEY_BYTES,
                got: bytes.len(),
            });
        }
        let mut buf = [0u8; PRIVATE_KEY_BYTES];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_BYTES] {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        write!(f, "PrivateKey(..)")
    }
}

/// Ed25519 keypair owning its seed
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random keypair
    pub fn random() -> Self {
        let mut seed = [0u8; PRIVATE_KEY_BYTES];
        OsRng.fill_bytes(&mut seed);
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Self { signing }
    }

    /// Deterministic keypair from a 32-byte seed
    pub fn from_seed(seed: &[u8; PRIVATE_KEY_BYTES]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn from_private_key(key: &PrivateKey) -> Self {
        Self {
            signing: SigningKey::from_bytes(key.as_bytes()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.signing.verifying_key(),
        }
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey(self.signing.to_bytes())
    }

    /// Sign `message` with this identity
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", hex::encode(self.public_key().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let kp = KeyPair::random();
        let message = b"boson signature test message";

        let sig = kp.sign(message);
        assert!(kp.public_key().verify(message, &sig));
        assert!(!kp.public_key().verify(b"wrong message", &sig));
    }

    #[test]
    fn test_deterministic_from_seed() {
        let seed = [42u8; 32];
        let a = KeyPair::from_seed(&seed);
        let b = KeyPair::from_seed(&seed);

        assert_eq!(a.public_key(), b.public_key());
        let sig = a.sign(b"x");
        assert!(b.public_key().verify(b"x", &sig));
    }

    #[test]
    fn test_rejects_wrong_lengths() {
        assert!(matches!(
            PublicKey::from_bytes(&[0u8; 31]),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 31 })
        ));
        assert!(matches!(
            Signature::from_bytes(&[0u8; 63]),
            Err(CryptoError::InvalidSignatureLength { expected: 64, got: 63 })
        ));
        assert!(matches!(
            PrivateKey::from_bytes(&[0u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }

    #[test]
    fn test_private_key_round_trip() {
        let kp = KeyPair::random();
        let restored = KeyPair::from_private_key(&kp.private_key());
        assert_eq!(kp.public_key(), restored.public_key());
    }
}
