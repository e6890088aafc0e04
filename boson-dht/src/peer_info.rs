//! Service peer announcements
//!
//! A [`PeerInfo`] points at a reachable endpoint owned by a service public
//! key. The owner always signs the record; when the announcement travels
//! through a different origin node, the origin countersigns the same
//! payload, making the record *authenticated*.
//!
//! `(id, fingerprint)` is the composite primary key: one service key can
//! announce several peers distinguished by fingerprint.

use std::fmt;

use boson_crypto::{random, KeyPair, Nonce, Signature};

use crate::error::Error;
use crate::id::Id;

#[derive(Clone)]
pub struct PeerInfo {
    id: Id,
    nonce: Nonce,
    sequence_number: u32,
    origin: Option<Id>,
    origin_signature: Option<Signature>,
    signature: Signature,
    fingerprint: i64,
    endpoint: String,
    extra: Option<Vec<u8>>,
}

impl PeerInfo {
    /// Create and sign a fresh announcement with a random nonce and
    /// fingerprint, starting at sequence number 0
    pub fn create(
        owner: &KeyPair,
        origin: Option<&KeyPair>,
        endpoint: &str,
        extra: Option<Vec<u8>>,
    ) -> Result<Self, Error> {
        Self::create_with(owner, origin, None, 0, endpoint, extra)
    }

    /// Create and sign an announcement with full control over fingerprint
    /// and sequence number
    pub fn create_with(
        owner: &KeyPair,
        origin: Option<&KeyPair>,
        fingerprint: Option<i64>,
        sequence_number: u32,
        endpoint: &str,
        extra: Option<Vec<u8>>,
    ) -> Result<Self, Error> {
        if endpoint.is_empty() {
            return Err(Error::InvalidRecord("peer endpoint is empty".into()));
        }

        let id = Id::of_keypair(owner);
        let origin_id = origin
            .map(Id::of_keypair)
            .filter(|origin_id| *origin_id != id);
        let fingerprint = fingerprint.unwrap_or_else(|| random::random_u64() as i64);

        let mut peer = Self {
            id,
            nonce: Nonce::random(),
            sequence_number,
            origin: origin_id,
            origin_signature: None,
            // placeholder until the payload is assembled below
            signature: Signature::from_bytes(&[0u8; 64]).expect("fixed length"),
            fingerprint,
            endpoint: endpoint.to_string(),
            extra,
        };

        let payload = peer.signing_payload();
        peer.signature = owner.sign(&payload);
        if peer.origin.is_some() {
            let origin_keypair = origin.expect("origin id implies origin keypair");
            peer.origin_signature = Some(origin_keypair.sign(&payload));
        }
        Ok(peer)
    }

    /// Reassemble a peer from wire fields, rejecting records whose
    /// signatures do not verify
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Id,
        nonce: Nonce,
        sequence_number: u32,
        origin: Option<Id>,
        origin_signature: Option<Signature>,
        signature: Signature,
        fingerprint: i64,
        endpoint: String,
        extra: Option<Vec<u8>>,
    ) -> Result<Self, Error> {
        if endpoint.is_empty() {
            return Err(Error::InvalidRecord("peer endpoint is empty".into()));
        }
        let peer = Self {
            id,
            nonce,
            sequence_number,
            origin,
            origin_signature,
            signature,
            fingerprint,
            endpoint,
            extra,
        };
        if !peer.is_valid() {
            return Err(Error::InvalidRecord("peer signature invalid".into()));
        }
        Ok(peer)
    }

    /// Canonical signing payload: integers little-endian, optional fields
    /// omitted rather than zero-filled
    fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            32 + 24
                + 4
                + self.origin.map_or(0, |_| 32)
                + 8
                + self.endpoint.len()
                + self.extra.as_ref().map_or(0, Vec::len),
        );
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(self.nonce.as_bytes());
        buf.extend_from_slice(&self.sequence_number.to_le_bytes());
        if let Some(origin) = &self.origin {
            buf.extend_from_slice(origin.as_bytes());
        }
        buf.extend_from_slice(&self.fingerprint.to_le_bytes());
        buf.extend_from_slice(self.endpoint.as_bytes());
        if let Some(extra) = &self.extra {
            buf.extend_from_slice(extra);
        }
        buf
    }

    /// Owner signature verifies under `id`, and the origin signature (when
    /// present) under `origin`
    pub fn is_valid(&self) -> bool {
        let payload = self.signing_payload();
        let Ok(owner_key) = self.id.to_public_key() else {
            return false;
        };
        if !owner_key.verify(&payload, &self.signature) {
            return false;
        }
        match (&self.origin, &self.origin_signature) {
            (None, None) => true,
            (Some(origin), Some(origin_sig)) => origin
                .to_public_key()
                .map(|key| key.verify(&payload, origin_sig))
                .unwrap_or(false),
            // an origin without countersignature (or the reverse) is malformed
            _ => false,
        }
    }

    /// Authenticated peers carry a verifying origin countersignature
    pub fn is_authenticated(&self) -> bool {
        self.origin.is_some() && self.is_valid()
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn origin(&self) -> Option<&Id> {
        self.origin.as_ref()
    }

    pub fn origin_signature(&self) -> Option<&Signature> {
        self.origin_signature.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn fingerprint(&self) -> i64 {
        self.fingerprint
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn extra(&self) -> Option<&[u8]> {
        self.extra.as_deref()
    }

    /// Composite primary key
    pub fn key(&self) -> (Id, i64) {
        (self.id, self.fingerprint)
    }
}

impl PartialEq for PeerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.nonce == other.nonce
            && self.sequence_number == other.sequence_number
            && self.origin == other.origin
            && self.origin_signature == other.origin_signature
            && self.signature == other.signature
            && self.fingerprint == other.fingerprint
            && self.endpoint == other.endpoint
            && self.extra == other.extra
    }
}

impl Eq for PeerInfo {}

impl fmt::Debug for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerInfo")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("seq", &self.sequence_number)
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.origin.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_verify() -> Result<(), Error> {
        let owner = KeyPair::random();
        let peer = PeerInfo::create(&owner, None, "udp://198.51.100.7:9000", None)?;

        assert!(peer.is_valid());
        assert!(!peer.is_authenticated());
        assert_eq!(*peer.id(), Id::of_keypair(&owner));
        assert_eq!(peer.sequence_number(), 0);
        Ok(())
    }

    #[test]
    fn test_authenticated_peer() -> Result<(), Error> {
        let owner = KeyPair::random();
        let origin = KeyPair::random();
        let peer = PeerInfo::create(&owner, Some(&origin), "udp://198.51.100.7:9000", None)?;

        assert!(peer.is_valid());
        assert!(peer.is_authenticated());
        assert_eq!(peer.origin(), Some(&Id::of_keypair(&origin)));
        Ok(())
    }

    #[test]
    fn test_owner_as_origin_collapses() -> Result<(), Error> {
        let owner = KeyPair::random();
        let peer = PeerInfo::create(&owner, Some(&owner), "udp://198.51.100.7:9000", None)?;

        assert!(peer.origin().is_none());
        assert!(!peer.is_authenticated());
        assert!(peer.is_valid());
        Ok(())
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let owner = KeyPair::random();
        assert!(PeerInfo::create(&owner, None, "", None).is_err());
    }

    #[test]
    fn test_tampered_endpoint_invalid() -> Result<(), Error> {
        let owner = KeyPair::random();
        let peer = PeerInfo::create(&owner, None, "udp://198.51.100.7:9000", None)?;

        let tampered = PeerInfo::from_parts(
            *peer.id(),
            *peer.nonce(),
            peer.sequence_number(),
            None,
            None,
            peer.signature().clone(),
            peer.fingerprint(),
            "udp://203.0.113.1:9000".to_string(),
            None,
        );
        assert!(tampered.is_err());
        Ok(())
    }

    #[test]
    fn test_extra_is_signed() -> Result<(), Error> {
        let owner = KeyPair::random();
        let peer = PeerInfo::create(
            &owner,
            None,
            "udp://198.51.100.7:9000",
            Some(b"meta".to_vec()),
        )?;

        let stripped = PeerInfo::from_parts(
            *peer.id(),
            *peer.nonce(),
            peer.sequence_number(),
            None,
            None,
            peer.signature().clone(),
            peer.fingerprint(),
            peer.endpoint().to_string(),
            None,
        );
        assert!(stripped.is_err());
        Ok(())
    }

    #[test]
    fn test_fixed_fingerprint_kept() -> Result<(), Error> {
        let owner = KeyPair::random();
        let peer = PeerInfo::create_with(&owner, None, Some(42), 7, "udp://h:1", None)?;
        assert_eq!(peer.fingerprint(), 42);
        assert_eq!(peer.sequence_number(), 7);
        Ok(())
    }
}
