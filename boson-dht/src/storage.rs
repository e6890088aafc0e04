//! Record storage contract
//!
//! The core only depends on this async interface; concrete persistence
//! lives outside. Implementations serialize their own internal state and
//! resolve futures on the caller's runtime. [`MemoryStorage`] is the
//! reference implementation and the test double for the node.
//!
//! Mutable-value puts enforce the sequence rules here: a CAS expectation
//! is checked first, then monotonicity. Storing a byte-identical record
//! again is idempotent.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::constants::{PEER_EXPIRATION, VALUE_EXPIRATION};
use crate::error::{Error, Result};
use crate::id::Id;
use crate::peer_info::PeerInfo;
use crate::value::Value;

#[async_trait]
pub trait DataStorage: Send + Sync {
    /// Store a value under its derived id. `expected_seq` carries a
    /// caller CAS expectation for mutable values.
    async fn put_value(
        &self,
        value: &Value,
        expected_seq: Option<u32>,
        persistent: bool,
    ) -> Result<()>;

    async fn value(&self, id: &Id) -> Result<Option<Value>>;

    async fn remove_value(&self, id: &Id) -> Result<bool>;

    /// Persistent values whose last announce is older than `before`
    async fn values_to_announce(&self, before: SystemTime) -> Result<Vec<Value>>;

    async fn mark_value_announced(&self, id: &Id) -> Result<()>;

    async fn put_peer(&self, peer: &PeerInfo, persistent: bool) -> Result<()>;

    /// Up to `max` peers announced under `id`
    async fn peers(&self, id: &Id, max: usize) -> Result<Vec<PeerInfo>>;

    async fn remove_peer(&self, id: &Id, fingerprint: i64) -> Result<bool>;

    async fn peers_to_announce(&self, before: SystemTime) -> Result<Vec<PeerInfo>>;

    async fn mark_peer_announced(&self, id: &Id, fingerprint: i64) -> Result<()>;

    /// Drop expired non-persistent records; returns how many were removed
    async fn purge_expired(&self) -> Result<usize>;

    async fn close(&self) -> Result<()>;
}

struct ValueRecord {
    value: Value,
    persistent: bool,
    stored_at: SystemTime,
    last_announce: SystemTime,
}

struct PeerRecord {
    peer: PeerInfo,
    persistent: bool,
    stored_at: SystemTime,
    last_announce: SystemTime,
}

#[derive(Default)]
struct Inner {
    values: HashMap<Id, ValueRecord>,
    peers: HashMap<(Id, i64), PeerRecord>,
}

/// In-memory storage with the full contract semantics
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    value_lifetime: Duration,
    peer_lifetime: Duration,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            value_lifetime: VALUE_EXPIRATION,
            peer_lifetime: PEER_EXPIRATION,
        }
    }

    /// Counts of stored (values, peers); diagnostics
    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.values.len(), inner.peers.len())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStorage for MemoryStorage {
    async fn put_value(
        &self,
        value: &Value,
        expected_seq: Option<u32>,
        persistent: bool,
    ) -> Result<()> {
        let id = value.id();
        let now = SystemTime::now();
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.values.get_mut(&id) {
            if existing.value.is_mutable() {
                let stored_seq = existing.value.sequence_number();
                if let Some(expected) = expected_seq {
                    if stored_seq != expected {
                        return Err(Error::CasFail {
                            expected,
                            stored: stored_seq,
                        });
                    }
                }
                if existing.value == *value {
                    // idempotent re-store refreshes nothing but liveness
                    existing.stored_at = now;
                    existing.persistent |= persistent;
                    return Ok(());
                }
                if value.sequence_number() <= stored_seq {
                    return Err(Error::SequenceNotMonotonic {
                        stored: stored_seq,
                        incoming: value.sequence_number(),
                    });
                }
            }
            existing.value = value.clone();
            existing.stored_at = now;
            existing.persistent |= persistent;
            return Ok(());
        }

        inner.values.insert(
            id,
            ValueRecord {
                value: value.clone(),
                persistent,
                stored_at: now,
                last_announce: now,
            },
        );
        Ok(())
    }

    async fn value(&self, id: &Id) -> Result<Option<Value>> {
        Ok(self
            .inner
            .lock()
            .await
            .values
            .get(id)
            .map(|record| record.value.clone()))
    }

    async fn remove_value(&self, id: &Id) -> Result<bool> {
        Ok(self.inner.lock().await.values.remove(id).is_some())
    }

    async fn values_to_announce(&self, before: SystemTime) -> Result<Vec<Value>> {
        Ok(self
            .inner
            .lock()
            .await
            .values
            .values()
            .filter(|record| record.persistent && record.last_announce < before)
            .map(|record| record.value.clone())
            .collect())
    }

    async fn mark_value_announced(&self, id: &Id) -> Result<()> {
        if let Some(record) = self.inner.lock().await.values.get_mut(id) {
            record.last_announce = SystemTime::now();
        }
        Ok(())
    }

    async fn put_peer(&self, peer: &PeerInfo, persistent: bool) -> Result<()> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock().await;
        let record = inner.peers.entry(peer.key()).or_insert_with(|| PeerRecord {
            peer: peer.clone(),
            persistent,
            stored_at: now,
            last_announce: now,
        });
        record.peer = peer.clone();
        record.stored_at = now;
        record.persistent |= persistent;
        Ok(())
    }

    async fn peers(&self, id: &Id, max: usize) -> Result<Vec<PeerInfo>> {
        Ok(self
            .inner
            .lock()
            .await
            .peers
            .values()
            .filter(|record| record.peer.id() == id)
            .take(max)
            .map(|record| record.peer.clone())
            .collect())
    }

    async fn remove_peer(&self, id: &Id, fingerprint: i64) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .peers
            .remove(&(*id, fingerprint))
            .is_some())
    }

    async fn peers_to_announce(&self, before: SystemTime) -> Result<Vec<PeerInfo>> {
        Ok(self
            .inner
            .lock()
            .await
            .peers
            .values()
            .filter(|record| record.persistent && record.last_announce < before)
            .map(|record| record.peer.clone())
            .collect())
    }

    async fn mark_peer_announced(&self, id: &Id, fingerprint: i64) -> Result<()> {
        if let Some(record) = self.inner.lock().await.peers.get_mut(&(*id, fingerprint)) {
            record.last_announce = SystemTime::now();
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = SystemTime::now();
        let value_lifetime = self.value_lifetime;
        let peer_lifetime = self.peer_lifetime;
        let mut inner = self.inner.lock().await;

        let values_before = inner.values.len();
        inner.values.retain(|_, record| {
            record.persistent
                || now
                    .duration_since(record.stored_at)
                    .map_or(true, |age| age < value_lifetime)
        });
        let peers_before = inner.peers.len();
        inner.peers.retain(|_, record| {
            record.persistent
                || now
                    .duration_since(record.stored_at)
                    .map_or(true, |age| age < peer_lifetime)
        });
        Ok((values_before - inner.values.len()) + (peers_before - inner.peers.len()))
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.values.clear();
        inner.peers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boson_crypto::{KeyPair, Nonce};

    #[tokio::test]
    async fn test_sequence_monotonicity() -> Result<()> {
        let storage = MemoryStorage::new();
        let kp = KeyPair::random();
        let nonce = Nonce::random();

        let v10 = Value::create_signed_value(&kp, nonce, 10, b"v0".to_vec())?;
        storage.put_value(&v10, None, false).await?;

        // update advances
        let v11 = v10.update(b"v1".to_vec())?;
        storage.put_value(&v11, None, false).await?;
        assert_eq!(
            storage.value(&v10.id()).await?.unwrap().sequence_number(),
            11
        );

        // stale write is refused
        let stale = Value::create_signed_value(&kp, nonce, 9, b"bad".to_vec())?;
        let err = storage.put_value(&stale, None, false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SequenceNotMonotonic {
                stored: 11,
                incoming: 9
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_idempotent_store() -> Result<()> {
        let storage = MemoryStorage::new();
        let kp = KeyPair::random();
        let v = Value::create_signed_value(&kp, Nonce::random(), 4, b"same".to_vec())?;

        storage.put_value(&v, None, false).await?;
        storage.put_value(&v, None, false).await?;
        let stored = storage.value(&v.id()).await?.unwrap();
        assert_eq!(stored.sequence_number(), 4);
        assert_eq!(stored, v);
        Ok(())
    }

    #[tokio::test]
    async fn test_cas() -> Result<()> {
        let storage = MemoryStorage::new();
        let kp = KeyPair::random();
        let v = Value::create_signed_value(&kp, Nonce::random(), 5, b"x".to_vec())?;
        storage.put_value(&v, None, false).await?;

        let next = v.update(b"y".to_vec())?;
        let err = storage.put_value(&next, Some(4), false).await.unwrap_err();
        assert!(matches!(err, Error::CasFail { expected: 4, stored: 5 }));

        storage.put_value(&next, Some(5), false).await?;
        assert_eq!(storage.value(&v.id()).await?.unwrap().sequence_number(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_peers_by_id_and_fingerprint() -> Result<()> {
        let storage = MemoryStorage::new();
        let owner = KeyPair::random();
        let a = PeerInfo::create_with(&owner, None, Some(1), 0, "udp://h:1", None)?;
        let b = PeerInfo::create_with(&owner, None, Some(2), 0, "udp://h:2", None)?;

        storage.put_peer(&a, false).await?;
        storage.put_peer(&b, false).await?;
        assert_eq!(storage.peers(a.id(), 8).await?.len(), 2);
        assert_eq!(storage.peers(a.id(), 1).await?.len(), 1);

        assert!(storage.remove_peer(a.id(), 1).await?);
        assert_eq!(storage.peers(a.id(), 8).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_announce_bookkeeping() -> Result<()> {
        let storage = MemoryStorage::new();
        let kp = KeyPair::random();
        let v = Value::create_signed_value(&kp, Nonce::random(), 0, b"p".to_vec())?;
        storage.put_value(&v, None, true).await?;

        let future = SystemTime::now() + Duration::from_secs(1);
        let due = storage.values_to_announce(future).await?;
        assert_eq!(due.len(), 1);

        storage.mark_value_announced(&v.id()).await?;
        let past = SystemTime::now() - Duration::from_secs(1);
        assert!(storage.values_to_announce(past).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_non_persistent_not_announced() -> Result<()> {
        let storage = MemoryStorage::new();
        let v = Value::create_value(b"immutable".to_vec())?;
        storage.put_value(&v, None, false).await?;

        let future = SystemTime::now() + Duration::from_secs(1);
        assert!(storage.values_to_announce(future).await?.is_empty());
        Ok(())
    }
}
