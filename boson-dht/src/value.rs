//! Stored values
//!
//! Three record variants share one type, distinguished by which optional
//! fields are present:
//!
//! - *immutable*: only data; the id is SHA-256 of the data
//! - *signed*: a mutable record owned by a public key; the id is SHA-256
//!   of the key, so updates keep the same id
//! - *encrypted*: a signed record whose data is sealed toward a recipient
//!
//! The signature always covers `nonce ‖ seq(le) ‖ data`, where data is the
//! ciphertext for encrypted values.

use std::fmt;

use boson_crypto::{CryptoBox, KeyPair, Nonce, Signature, MAC_BYTES};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::id::Id;

#[derive(Clone)]
pub struct Value {
    public_key: Option<Id>,
    recipient: Option<Id>,
    nonce: Option<Nonce>,
    sequence_number: u32,
    signature: Option<Signature>,
    data: Vec<u8>,
    // present only on locally created mutable values; never serialized
    owner: Option<KeyPair>,
}

impl Value {
    /// Immutable value
    pub fn create_value(data: Vec<u8>) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::InvalidRecord("value data is empty".into()));
        }
        Ok(Self {
            public_key: None,
            recipient: None,
            nonce: None,
            sequence_number: 0,
            signature: None,
            data,
            owner: None,
        })
    }

    /// Signed mutable value owned by `keypair`
    pub fn create_signed_value(
        keypair: &KeyPair,
        nonce: Nonce,
        sequence_number: u32,
        data: Vec<u8>,
    ) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::InvalidRecord("value data is empty".into()));
        }
        let payload = signing_payload(&nonce, sequence_number, &data);
        Ok(Self {
            public_key: Some(Id::of_keypair(keypair)),
            recipient: None,
            nonce: Some(nonce),
            sequence_number,
            signature: Some(keypair.sign(&payload)),
            data,
            owner: Some(keypair.clone()),
        })
    }

    /// Signed mutable value sealed toward `recipient`
    pub fn create_encrypted_value(
        keypair: &KeyPair,
        recipient: &Id,
        nonce: Nonce,
        sequence_number: u32,
        data: Vec<u8>,
    ) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::InvalidRecord("value data is empty".into()));
        }
        let recipient_key = recipient.to_public_key()?;
        let ciphertext = CryptoBox::new(&recipient_key, keypair).encrypt(&nonce, &data)?;
        let payload = signing_payload(&nonce, sequence_number, &ciphertext);
        Ok(Self {
            public_key: Some(Id::of_keypair(keypair)),
            recipient: Some(*recipient),
            nonce: Some(nonce),
            sequence_number,
            signature: Some(keypair.sign(&payload)),
            data: ciphertext,
            owner: Some(keypair.clone()),
        })
    }

    /// Reassemble a value from wire fields. Field presence is validated
    /// here; signature validity is the caller's `is_valid()` check.
    pub fn from_parts(
        public_key: Option<Id>,
        recipient: Option<Id>,
        nonce: Option<Nonce>,
        sequence_number: u32,
        signature: Option<Signature>,
        data: Vec<u8>,
    ) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::InvalidRecord("value data is empty".into()));
        }
        match (&public_key, &nonce, &signature) {
            (None, None, None) => {
                if recipient.is_some() {
                    return Err(Error::InvalidRecord(
                        "recipient without public key".into(),
                    ));
                }
                if sequence_number != 0 {
                    return Err(Error::InvalidRecord(
                        "sequence number on immutable value".into(),
                    ));
                }
            }
            (Some(_), Some(_), Some(_)) => {}
            _ => {
                return Err(Error::InvalidRecord(
                    "mutable value requires public key, nonce and signature".into(),
                ));
            }
        }
        Ok(Self {
            public_key,
            recipient,
            nonce,
            sequence_number,
            signature,
            data,
            owner: None,
        })
    }

    /// Identifier the value is stored under
    pub fn id(&self) -> Id {
        match (&self.public_key, &self.recipient) {
            (None, _) => Id::of_sha256(&self.data),
            (Some(key), None) => Id::of_sha256(key.as_bytes()),
            (Some(key), Some(recipient)) => {
                let mut hasher = Sha256::new();
                hasher.update(key.as_bytes());
                hasher.update(recipient.as_bytes());
                let mut buf = [0u8; 32];
                buf.copy_from_slice(&hasher.finalize());
                Id::from_array(buf)
            }
        }
    }

    pub fn is_mutable(&self) -> bool {
        self.public_key.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.recipient.is_some()
    }

    /// Signature verifies under the owner key over the canonical payload;
    /// encrypted data must at least hold the MAC
    pub fn is_valid(&self) -> bool {
        let Some(public_key) = &self.public_key else {
            // immutable: nothing to verify beyond non-empty data
            return !self.data.is_empty();
        };
        if self.recipient.is_some() && self.data.len() < MAC_BYTES {
            return false;
        }
        let (Some(nonce), Some(signature)) = (&self.nonce, &self.signature) else {
            return false;
        };
        let payload = signing_payload(nonce, self.sequence_number, &self.data);
        public_key
            .to_public_key()
            .map(|key| key.verify(&payload, signature))
            .unwrap_or(false)
    }

    /// Produce the successor record: same id, `seq + 1`, fresh signature.
    /// Only the owner of a mutable value can update it.
    pub fn update(&self, new_data: Vec<u8>) -> Result<Self, Error> {
        if !self.is_mutable() {
            return Err(Error::State("immutable values cannot be updated".into()));
        }
        let Some(owner) = &self.owner else {
            return Err(Error::State("not the owner of this value".into()));
        };
        let nonce = self.nonce.expect("mutable value carries a nonce");
        let next_seq = self.sequence_number + 1;
        match &self.recipient {
            None => Self::create_signed_value(owner, nonce, next_seq, new_data),
            Some(recipient) => {
                Self::create_encrypted_value(owner, recipient, nonce, next_seq, new_data)
            }
        }
    }

    /// Open an encrypted value as its recipient
    pub fn decrypt(&self, recipient: &KeyPair) -> Result<Vec<u8>, Error> {
        let (Some(public_key), Some(_), Some(nonce)) =
            (&self.public_key, &self.recipient, &self.nonce)
        else {
            return Err(Error::State("value is not encrypted".into()));
        };
        let sender = public_key.to_public_key()?;
        let nonce = *nonce;
        Ok(CryptoBox::new(&sender, recipient).decrypt(&nonce, &self.data)?)
    }

    pub fn public_key(&self) -> Option<&Id> {
        self.public_key.as_ref()
    }

    pub fn recipient(&self) -> Option<&Id> {
        self.recipient.as_ref()
    }

    pub fn nonce(&self) -> Option<&Nonce> {
        self.nonce.as_ref()
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

fn signing_payload(nonce: &Nonce, sequence_number: u32, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24 + 4 + data.len());
    buf.extend_from_slice(nonce.as_bytes());
    buf.extend_from_slice(&sequence_number.to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

// Equality is over the wire-visible fields; local ownership is incidental.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
            && self.recipient == other.recipient
            && self.nonce == other.nonce
            && self.sequence_number == other.sequence_number
            && self.signature == other.signature
            && self.data == other.data
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match (&self.public_key, &self.recipient) {
            (None, _) => "immutable",
            (Some(_), None) => "signed",
            (Some(_), Some(_)) => "encrypted",
        };
        f.debug_struct("Value")
            .field("kind", &kind)
            .field("id", &self.id())
            .field("seq", &self.sequence_number)
            .field("len", &self.data.len())
            .finish()
    }
}
