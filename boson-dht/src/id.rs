//! 256-bit identifier algebra
//!
//! A Boson [`Id`] is the 32-byte Ed25519 public key of an identity, routed
//! on the XOR metric. Bit 0 is the most significant bit of byte 0. All hot
//! path operations are allocation-free.
//!
//! Textual forms: Base58 (Bitcoin alphabet), hex with optional `0x`, and
//! the W3C DID wrapper `did:boson:<base58>`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use boson_crypto::{KeyPair, PublicKey};
use rand::{rngs::OsRng, RngCore};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Identifier width in bytes
pub const ID_BYTES: usize = 32;
/// Identifier width in bits
pub const ID_BITS: usize = 256;

/// DID method prefix of the textual DID form
pub const DID_PREFIX: &str = "did:boson:";

/// 256-bit node / record identifier
///
/// Equality and ordering are lexicographic over the raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id([u8; ID_BYTES]);

impl Id {
    /// The all-zero identifier
    pub const MIN: Id = Id([0u8; ID_BYTES]);
    /// The all-one identifier
    pub const MAX: Id = Id([0xFFu8; ID_BYTES]);

    pub fn random() -> Self {
        let mut buf = [0u8; ID_BYTES];
        OsRng.fill_bytes(&mut buf);
        Self(buf)
    }

    pub const fn from_array(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != ID_BYTES {
            return Err(Error::InvalidId(format!(
                "binary id must be {} bytes, got {}",
                ID_BYTES,
                bytes.len()
            )));
        }
        let mut buf = [0u8; ID_BYTES];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Parse a hex form, with or without the `0x` prefix
    pub fn of_hex(s: &str) -> Result<Self, Error> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.len() != ID_BYTES * 2 {
            return Err(Error::InvalidId(format!(
                "hex id must be {} digits, got {}",
                ID_BYTES * 2,
                digits.len()
            )));
        }
        let bytes = hex::decode(digits)
            .map_err(|e| Error::InvalidId(format!("invalid hex digit: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Parse the Base58 form (Bitcoin alphabet)
    pub fn of_base58(s: &str) -> Result<Self, Error> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| Error::InvalidId(format!("invalid base58: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Parse the DID form `did:boson:<base58>`
    pub fn of_did(s: &str) -> Result<Self, Error> {
        match s.strip_prefix(DID_PREFIX) {
            Some(rest) => Self::of_base58(rest),
            None => Err(Error::InvalidId(format!(
                "DID must start with '{}': {}",
                DID_PREFIX, s
            ))),
        }
    }

    /// The id of an identity is its public key
    pub fn of_public_key(key: &PublicKey) -> Self {
        Self(*key.as_bytes())
    }

    pub fn of_keypair(keypair: &KeyPair) -> Self {
        Self::of_public_key(&keypair.public_key())
    }

    /// Immutable-value id: SHA-256 over the raw data
    pub fn of_sha256(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut buf = [0u8; ID_BYTES];
        buf.copy_from_slice(&digest);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; ID_BYTES] {
        self.0
    }

    /// Reinterpret as an Ed25519 verifying key; fails for the few byte
    /// strings that do not decode to a curve point
    pub fn to_public_key(&self) -> Result<PublicKey, Error> {
        Ok(PublicKey::from_bytes(&self.0)?)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn to_did(&self) -> String {
        format!("{}{}", DID_PREFIX, self.to_base58())
    }

    // ========== XOR METRIC ==========

    /// XOR distance to `other`
    pub fn distance(&self, other: &Id) -> Id {
        let mut buf = [0u8; ID_BYTES];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.0[i] ^ other.0[i];
        }
        Id(buf)
    }

    /// Bit length of the XOR distance, in `[0, 256]`; a cheap proxy for
    /// the bucket index
    pub fn approx_distance(&self, other: &Id) -> usize {
        ID_BITS - self.distance(other).leading_zeros()
    }

    /// Rank `a` against `b` by XOR distance to `self`: the first byte where
    /// the two distances differ decides
    pub fn three_way_compare(&self, a: &Id, b: &Id) -> Ordering {
        for i in 0..ID_BYTES {
            let da = a.0[i] ^ self.0[i];
            let db = b.0[i] ^ self.0[i];
            if da != db {
                return da.cmp(&db);
            }
        }
        Ordering::Equal
    }

    pub fn leading_zeros(&self) -> usize {
        let mut count = 0;
        for b in &self.0 {
            if *b == 0 {
                count += 8;
            } else {
                count += b.leading_zeros() as usize;
                break;
            }
        }
        count
    }

    pub fn trailing_zeros(&self) -> usize {
        let mut count = 0;
        for b in self.0.iter().rev() {
            if *b == 0 {
                count += 8;
            } else {
                count += b.trailing_zeros() as usize;
                break;
            }
        }
        count
    }

    /// Bit length of the value: position of the highest set bit plus one
    pub fn bit_length(&self) -> usize {
        ID_BITS - self.leading_zeros()
    }

    /// Big-endian addition modulo 2^256
    pub fn add(&self, other: &Id) -> Id {
        let mut buf = [0u8; ID_BYTES];
        let mut carry = 0u16;
        for i in (0..ID_BYTES).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            buf[i] = sum as u8;
            carry = sum >> 8;
        }
        Id(buf)
    }

    /// Bit `idx`, where bit 0 is the most significant bit of byte 0
    pub fn bit_at(&self, idx: usize) -> bool {
        debug_assert!(idx < ID_BITS);
        self.0[idx >> 3] & (0x80 >> (idx & 7)) != 0
    }

    pub fn set_bit(&mut self, idx: usize, value: bool) {
        debug_assert!(idx < ID_BITS);
        let mask = 0x80 >> (idx & 7);
        if value {
            self.0[idx >> 3] |= mask;
        } else {
            self.0[idx >> 3] &= !mask;
        }
    }

    /// First `n + 1` bits of `a` and `b` are equal; `n = -1` is trivially
    /// true
    pub fn bits_equal(a: &Id, b: &Id, n: i32) -> bool {
        if n < 0 {
            return true;
        }
        let n = n as usize;
        debug_assert!(n < ID_BITS);
        let idx = n >> 3;
        if a.0[..idx] != b.0[..idx] {
            return false;
        }
        let mask = (0xFF00u16 >> ((n & 7) + 1)) as u8;
        (a.0[idx] ^ b.0[idx]) & mask == 0
    }

    /// Copy the first `depth + 1` bits of `src` into `dst`
    pub fn bits_copy(src: &Id, dst: &mut Id, depth: i32) {
        if depth < 0 {
            return;
        }
        let depth = depth as usize;
        debug_assert!(depth < ID_BITS);
        let idx = depth >> 3;
        dst.0[..idx].copy_from_slice(&src.0[..idx]);
        let mask = (0xFF00u16 >> ((depth & 7) + 1)) as u8;
        dst.0[idx] = (dst.0[idx] & !mask) | (src.0[idx] & mask);
    }

    /// Synthesize an id at approximate distance `d` from `self`: the top
    /// `256 - d` bits are kept, the bottom `d` bits are flipped
    pub fn at_distance(&self, d: usize) -> Id {
        debug_assert!(d <= ID_BITS);
        let mut buf = self.0;
        if d == 0 {
            return Id(buf);
        }
        let full = d >> 3;
        for b in buf.iter_mut().rev().take(full) {
            *b ^= 0xFF;
        }
        let rem = d & 7;
        if rem != 0 {
            buf[ID_BYTES - 1 - full] ^= (1u8 << rem) - 1;
        }
        Id(buf)
    }
}

impl From<&PublicKey> for Id {
    fn from(key: &PublicKey) -> Self {
        Id::of_public_key(key)
    }
}

impl FromStr for Id {
    type Err = Error;

    /// Accepts the DID form, hex (with or without `0x`), or Base58
    fn from_str(s: &str) -> Result<Self, Error> {
        if s.starts_with(DID_PREFIX) {
            Self::of_did(s)
        } else if s.starts_with("0x")
            || (s.len() == ID_BYTES * 2 && s.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            Self::of_hex(s)
        } else {
            Self::of_base58(s)
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}..)", hex::encode(&self.0[..4]))
    }
}

// Binary formats carry the raw 32 bytes, textual formats the Base58 form.
impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base58())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = Id;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32-byte id or its textual form")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Id, E> {
                Id::from_bytes(v).map_err(E::custom)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Id, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Id, A::Error> {
                let mut buf = Vec::with_capacity(ID_BYTES);
                while let Some(b) = seq.next_element::<u8>()? {
                    buf.push(b);
                }
                Id::from_bytes(&buf).map_err(serde::de::Error::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(IdVisitor)
        } else {
            deserializer.deserialize_bytes(IdVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_byte(idx: usize, value: u8) -> Id {
        let mut buf = [0u8; ID_BYTES];
        buf[idx] = value;
        Id::from_array(buf)
    }

    #[test]
    fn test_distance_identity_and_symmetry() {
        let a = Id::random();
        let b = Id::random();

        assert_eq!(a.distance(&a), Id::MIN);
        assert_eq!(a.distance(&b), b.distance(&a));
        assert!(a.approx_distance(&b) <= ID_BITS);
        assert_eq!(a.approx_distance(&a), 0);
    }

    #[test]
    fn test_leading_trailing_zeros() {
        assert_eq!(Id::MIN.leading_zeros(), 256);
        assert_eq!(Id::MIN.trailing_zeros(), 256);
        assert_eq!(Id::MAX.leading_zeros(), 0);

        let id = id_with_byte(0, 0x01);
        assert_eq!(id.leading_zeros(), 7);
        assert_eq!(id.bit_length(), 249);

        let id = id_with_byte(31, 0x80);
        assert_eq!(id.trailing_zeros(), 7);
    }

    #[test]
    fn test_three_way_compare() {
        let target = Id::MIN;
        let near = id_with_byte(31, 0x01);
        let far = id_with_byte(0, 0x80);

        assert_eq!(target.three_way_compare(&near, &far), Ordering::Less);
        assert_eq!(target.three_way_compare(&far, &near), Ordering::Greater);
        assert_eq!(target.three_way_compare(&near, &near), Ordering::Equal);
    }

    #[test]
    fn test_add_with_carry() {
        let one = id_with_byte(31, 0x01);
        let mut ff = [0u8; ID_BYTES];
        ff[31] = 0xFF;
        let sum = Id::from_array(ff).add(&one);
        assert_eq!(sum.as_bytes()[31], 0x00);
        assert_eq!(sum.as_bytes()[30], 0x01);

        // wraps modulo 2^256
        assert_eq!(Id::MAX.add(&one), Id::MIN);
    }

    #[test]
    fn test_bits_equal() {
        let a = Id::from_array([0b1010_0000; 32]);
        let mut b = a;
        assert!(Id::bits_equal(&a, &b, -1));
        assert!(Id::bits_equal(&a, &b, 255));

        b.set_bit(9, true);
        assert!(Id::bits_equal(&a, &b, 8));
        assert!(!Id::bits_equal(&a, &b, 9));
    }

    #[test]
    fn test_bits_copy() {
        let src = Id::MAX;
        let mut dst = Id::MIN;
        Id::bits_copy(&src, &mut dst, 10);
        for i in 0..=10 {
            assert!(dst.bit_at(i));
        }
        for i in 11..ID_BITS {
            assert!(!dst.bit_at(i));
        }
    }

    #[test]
    fn test_at_distance() {
        let id = Id::random();
        for d in [0usize, 1, 7, 8, 17, 128, 256] {
            let other = id.at_distance(d);
            assert_eq!(id.approx_distance(&other), d, "distance {}", d);
        }
    }

    #[test]
    fn test_hex_round_trip_and_errors() {
        let id = Id::random();
        assert_eq!(Id::of_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(Id::of_hex(&id.to_hex()[2..]).unwrap(), id);

        let err = Id::of_hex("0x1234").unwrap_err();
        assert!(err.to_string().contains("64 digits"));

        let bad = "zz".repeat(32);
        assert!(Id::of_hex(&bad).unwrap_err().to_string().contains("hex"));
    }

    #[test]
    fn test_base58_and_did_round_trip() {
        let id = Id::random();
        assert_eq!(Id::of_base58(&id.to_base58()).unwrap(), id);

        let did = id.to_did();
        assert!(did.starts_with("did:boson:"));
        assert_eq!(Id::of_did(&did).unwrap(), id);
        assert!(Id::of_did("did:other:abc").is_err());
    }

    #[test]
    fn test_from_str_accepts_all_forms() {
        let id = Id::random();
        assert_eq!(id.to_hex().parse::<Id>().unwrap(), id);
        assert_eq!(id.to_base58().parse::<Id>().unwrap(), id);
        assert_eq!(id.to_did().parse::<Id>().unwrap(), id);
    }

    #[test]
    fn test_wrong_length_binary() {
        assert!(Id::from_bytes(&[0u8; 20]).is_err());
        assert!(Id::from_bytes(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_of_public_key_matches_bytes() {
        let kp = boson_crypto::KeyPair::random();
        let id = Id::of_keypair(&kp);
        assert_eq!(id.as_bytes(), kp.public_key().as_bytes());
        assert!(id.to_public_key().is_ok());
    }
}
