//! Per-remote encryption context cache
//!
//! Deriving a Curve25519 box context costs a point conversion, a DH
//! exchange and a KDF run, so contexts are cached per remote id in a
//! bounded LRU. Evicted contexts drop their key material on the way out.

use std::num::NonZeroUsize;
use std::sync::Arc;

use boson_crypto::{CryptoBox, KeyPair};
use lru::LruCache;

use crate::error::Result;
use crate::id::Id;

const CACHE_CAPACITY: usize = 256;

pub struct CryptoCache {
    local: KeyPair,
    contexts: LruCache<Id, Arc<CryptoBox>>,
}

impl CryptoCache {
    pub fn new(local: KeyPair) -> Self {
        Self {
            local,
            contexts: LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            ),
        }
    }

    /// Context toward `remote`, building and caching it on first use
    pub fn get(&mut self, remote: &Id) -> Result<Arc<CryptoBox>> {
        if let Some(context) = self.contexts.get(remote) {
            return Ok(Arc::clone(context));
        }
        let remote_key = remote.to_public_key()?;
        let context = Arc::new(CryptoBox::new(&remote_key, &self.local));
        self.contexts.put(*remote, Arc::clone(&context));
        Ok(context)
    }

    pub fn evict(&mut self, remote: &Id) {
        self.contexts.pop(remote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boson_crypto::Nonce;

    #[test]
    fn test_cache_round_trip() -> Result<()> {
        let alice = KeyPair::random();
        let bob = KeyPair::random();
        let mut alice_cache = CryptoCache::new(alice.clone());
        let mut bob_cache = CryptoCache::new(bob.clone());

        let nonce = Nonce::random();
        let context_a = alice_cache.get(&Id::of_keypair(&bob))?;
        let sealed = context_a.encrypt(&nonce, b"cached context payload")?;

        let context_b = bob_cache.get(&Id::of_keypair(&alice))?;
        assert_eq!(context_b.decrypt(&nonce, &sealed)?, b"cached context payload");

        // second get hits the cache and yields the same context
        let again = alice_cache.get(&Id::of_keypair(&bob))?;
        assert!(Arc::ptr_eq(&context_a, &again));
        Ok(())
    }

    #[test]
    fn test_evict() -> Result<()> {
        let alice = KeyPair::random();
        let bob_id = Id::of_keypair(&KeyPair::random());
        let mut cache = CryptoCache::new(alice);

        let first = cache.get(&bob_id)?;
        cache.evict(&bob_id);
        let second = cache.get(&bob_id)?;
        assert!(!Arc::ptr_eq(&first, &second));
        Ok(())
    }
}
