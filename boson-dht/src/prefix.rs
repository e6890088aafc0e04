//! Binary prefixes over the identifier space
//!
//! A [`Prefix`] names one subtree of the binary trie the routing table is
//! built on. `depth` is the index of the last significant bit; -1 covers
//! the whole space.

use std::fmt;

use rand::{rngs::OsRng, RngCore};

use crate::id::{Id, ID_BITS};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    id: Id,
    depth: i32,
}

impl Prefix {
    /// The prefix covering the whole 256-bit space
    pub const ALL: Prefix = Prefix {
        id: Id::MIN,
        depth: -1,
    };

    /// Build a prefix from the first `depth + 1` bits of `id`
    pub fn new(depth: i32, id: &Id) -> Self {
        debug_assert!(depth >= -1 && depth < ID_BITS as i32);
        let mut base = Id::MIN;
        Id::bits_copy(id, &mut base, depth);
        Self { id: base, depth }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Number of significant bits
    pub fn bit_count(&self) -> usize {
        (self.depth + 1) as usize
    }

    pub fn is_prefix_of(&self, id: &Id) -> bool {
        Id::bits_equal(&self.id, id, self.depth)
    }

    /// A prefix one bit short of the full id width can no longer split
    pub fn is_splittable(&self) -> bool {
        self.depth < ID_BITS as i32 - 1
    }

    /// Child prefix with the next bit set to `high`
    pub fn split_branch(&self, high: bool) -> Prefix {
        debug_assert!(self.is_splittable());
        let depth = self.depth + 1;
        let mut id = self.id;
        id.set_bit(depth as usize, high);
        Prefix { id, depth }
    }

    pub fn parent(&self) -> Prefix {
        if self.depth <= 0 {
            return Prefix::ALL;
        }
        let depth = self.depth - 1;
        Prefix::new(depth, &self.id)
    }

    /// Two prefixes of equal depth sharing all but the last bit
    pub fn is_sibling_of(&self, other: &Prefix) -> bool {
        self.depth >= 0
            && self.depth == other.depth
            && Id::bits_equal(&self.id, &other.id, self.depth - 1)
            && self.id.bit_at(self.depth as usize) != other.id.bit_at(other.depth as usize)
    }

    /// Smallest id covered by this prefix
    pub fn first_id(&self) -> Id {
        self.id
    }

    /// Largest id covered by this prefix
    pub fn last_id(&self) -> Id {
        let mut last = Id::MAX;
        Id::bits_copy(&self.id, &mut last, self.depth);
        last
    }

    /// Random id covered by this prefix; used for bucket refresh lookups
    pub fn random_id(&self) -> Id {
        let mut buf = [0u8; 32];
        OsRng.fill_bytes(&mut buf);
        let mut id = Id::from_array(buf);
        Id::bits_copy(&self.id, &mut id, self.depth);
        id
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth < 0 {
            return f.write_str("all/0");
        }
        write!(f, "{}/{}", hex::encode(self.id.as_bytes()), self.bit_count())
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefix({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_everything() {
        assert!(Prefix::ALL.is_prefix_of(&Id::random()));
        assert!(Prefix::ALL.is_splittable());
        assert_eq!(Prefix::ALL.bit_count(), 0);
    }

    #[test]
    fn test_split_partitions_space() {
        let low = Prefix::ALL.split_branch(false);
        let high = Prefix::ALL.split_branch(true);

        for _ in 0..64 {
            let id = Id::random();
            assert_ne!(low.is_prefix_of(&id), high.is_prefix_of(&id));
        }
        assert!(low.is_sibling_of(&high));
        assert!(high.is_sibling_of(&low));
        assert_eq!(low.parent(), Prefix::ALL);
        assert_eq!(high.parent(), Prefix::ALL);
    }

    #[test]
    fn test_first_last_and_random_covered() {
        let p = Prefix::ALL.split_branch(true).split_branch(false);
        assert!(p.is_prefix_of(&p.first_id()));
        assert!(p.is_prefix_of(&p.last_id()));
        assert!(p.first_id() <= p.last_id());
        for _ in 0..32 {
            assert!(p.is_prefix_of(&p.random_id()));
        }
    }

    #[test]
    fn test_depth_exhaustion() {
        let mut p = Prefix::ALL;
        for _ in 0..ID_BITS {
            assert!(p.is_splittable());
            p = p.split_branch(false);
        }
        assert!(!p.is_splittable());
        assert_eq!(p.bit_count(), ID_BITS);
    }

    #[test]
    fn test_new_masks_low_bits() {
        let id = Id::MAX;
        let p = Prefix::new(7, &id);
        // bits 0..=7 kept, everything else cleared
        assert_eq!(p.first_id().as_bytes()[0], 0xFF);
        assert_eq!(&p.first_id().as_bytes()[1..], &[0u8; 31][..]);
    }
}
