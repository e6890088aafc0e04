//! Binary-trie routing table
//!
//! A sorted list of k-buckets whose prefixes always form a prefix-free
//! cover of the identifier space. Buckets split on demand around the home
//! prefix and merge back during maintenance when both siblings thinned out.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::constants::{CACHE_MAX_AGE, K};
use crate::error::{Error, Result};
use crate::id::Id;
use crate::node_info::NodeInfo;
use crate::prefix::Prefix;
use crate::routing::bucket::KBucket;
use crate::routing::entry::KBucketEntry;

#[derive(Debug)]
pub struct RoutingTable {
    local_id: Id,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: Id) -> Self {
        Self {
            local_id,
            buckets: vec![KBucket::new(Prefix::ALL, true)],
        }
    }

    pub fn local_id(&self) -> &Id {
        &self.local_id
    }

    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    /// Total number of main entries
    pub fn size(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    /// Index of the bucket covering `id`; the prefixes cover the whole
    /// space, so this always resolves
    pub(crate) fn index_of(&self, id: &Id) -> usize {
        self.buckets
            .partition_point(|b| b.prefix().first_id() <= *id)
            .saturating_sub(1)
    }

    pub fn bucket_of(&self, id: &Id) -> &KBucket {
        &self.buckets[self.index_of(id)]
    }

    fn bucket_of_mut(&mut self, id: &Id) -> &mut KBucket {
        let idx = self.index_of(id);
        &mut self.buckets[idx]
    }

    /// Insert or refresh an entry, splitting buckets as required
    pub fn put(&mut self, entry: KBucketEntry) {
        if entry.id() == &self.local_id {
            return;
        }
        loop {
            let idx = self.index_of(entry.id());
            let bucket = &self.buckets[idx];
            let splittable = bucket.prefix().is_splittable()
                && bucket.is_full()
                && entry.is_reachable()
                && !bucket.contains(entry.id())
                && !bucket.any_needs_replacement()
                && (bucket.is_home()
                    || bucket.prefix().split_branch(true).is_prefix_of(entry.id()));
            if !splittable {
                self.buckets[idx].put(entry);
                return;
            }
            self.split(idx);
        }
    }

    fn split(&mut self, idx: usize) {
        let parent = &mut self.buckets[idx];
        let low_prefix = parent.prefix().split_branch(false);
        let high_prefix = parent.prefix().split_branch(true);
        debug!(parent = %parent.prefix(), "splitting bucket");

        let (entries, replacements) = parent.drain();
        let mut low = KBucket::new(low_prefix, low_prefix.is_prefix_of(&self.local_id));
        let mut high = KBucket::new(high_prefix, high_prefix.is_prefix_of(&self.local_id));

        for entry in entries {
            if high_prefix.is_prefix_of(entry.id()) {
                high.push_entry_for_split(entry);
            } else {
                low.push_entry_for_split(entry);
            }
        }
        for replacement in replacements {
            if high_prefix.is_prefix_of(replacement.id()) {
                high.push_replacement_for_split(replacement);
            } else {
                low.push_replacement_for_split(replacement);
            }
        }

        drop(self.buckets.splice(idx..=idx, [low, high]));
    }

    /// Direct placement for trusted snapshot entries: splits
    /// unconditionally until the entry fits as a main entry. The split
    /// heuristics of [`Self::put`] are order-dependent and could demote
    /// entries that were mains when the snapshot was taken.
    fn put_direct(&mut self, entry: KBucketEntry) {
        if entry.id() == &self.local_id {
            return;
        }
        loop {
            let idx = self.index_of(entry.id());
            let bucket = &mut self.buckets[idx];
            if bucket.contains(entry.id()) || !bucket.is_full() {
                bucket.put(entry);
                return;
            }
            if !bucket.prefix().is_splittable() {
                bucket.put(entry);
                return;
            }
            self.split(idx);
        }
    }

    /// The sender of a verified response
    pub fn notify_response(&mut self, node: NodeInfo, rtt: Option<std::time::Duration>) {
        self.put(KBucketEntry::new_reachable(node, rtt));
    }

    /// Hearsay contact: the sender of an inbound request, not yet verified
    /// by a round trip of our own
    pub fn observe(&mut self, node: NodeInfo) {
        self.put(KBucketEntry::new(node));
    }

    pub fn notify_send(&mut self, id: &Id) {
        self.bucket_of_mut(id).on_send(id);
    }

    pub fn notify_timeout(&mut self, id: &Id) {
        self.bucket_of_mut(id).on_timeout(id);
    }

    /// Maintenance sweep: promote replacements, then merge sibling buckets
    /// whose combined surviving occupancy fits one bucket
    pub fn maintain(&mut self) {
        for bucket in &mut self.buckets {
            bucket.promote_replacements();
        }

        let mut i = 0;
        while i + 1 < self.buckets.len() {
            let a = &self.buckets[i];
            let b = &self.buckets[i + 1];
            let mergeable = a.prefix().is_sibling_of(b.prefix())
                && a.effective_size() + b.effective_size() <= K;
            if !mergeable {
                i += 1;
                continue;
            }

            let parent_prefix = a.prefix().parent();
            debug!(parent = %parent_prefix, "merging sibling buckets");
            let mut merged = KBucket::new(
                parent_prefix,
                parent_prefix.is_prefix_of(&self.local_id),
            );
            let (entries_a, repl_a) = self.buckets[i].drain();
            let (entries_b, repl_b) = self.buckets[i + 1].drain();
            for entry in entries_a.into_iter().chain(entries_b) {
                merged.put(entry);
            }
            for replacement in repl_a.into_iter().chain(repl_b) {
                merged.put(replacement);
            }
            drop(self.buckets.splice(i..=i + 1, [merged]));
            // the merged bucket may cascade with its own sibling
            i = i.saturating_sub(1);
        }
    }

    /// Buckets whose refresh window elapsed; yields a random id inside
    /// each such prefix for a maintenance lookup
    pub fn refresh_targets(&mut self) -> Vec<Id> {
        let mut targets = Vec::new();
        for bucket in &mut self.buckets {
            if bucket.needs_refresh() {
                bucket.mark_refreshed();
                targets.push(bucket.prefix().random_id());
            }
        }
        targets
    }

    /// Nodes across all buckets that are due a liveness probe
    pub fn nodes_to_ping(&self) -> Vec<NodeInfo> {
        self.buckets
            .iter()
            .flat_map(KBucket::entries_to_ping)
            .collect()
    }

    // ========== SNAPSHOT PERSISTENCE ==========

    /// Write a snapshot atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let doc = CacheDocument {
            node_id: self.local_id,
            timestamp,
            entries: self
                .buckets
                .iter()
                .flat_map(|b| b.entries().iter())
                .map(CacheEntry::from)
                .collect(),
            replacements: self
                .buckets
                .iter()
                .flat_map(|b| b.replacements().iter())
                .map(CacheEntry::from)
                .collect(),
        };

        let mut buf = Vec::new();
        ciborium::into_writer(&doc, &mut buf)
            .map_err(|e| Error::State(format!("cache encode: {}", e)))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &buf)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), entries = doc.entries.len(), "saved routing table");
        Ok(())
    }

    /// Load a snapshot. A fresh snapshot (matching node id, younger than
    /// [`CACHE_MAX_AGE`]) restores entries as verified; anything else is
    /// funneled through the normal put path as unverified hearsay.
    pub fn load(&mut self, path: &Path) -> Result<usize> {
        let bytes = std::fs::read(path)?;
        let doc: CacheDocument = ciborium::from_reader(&bytes[..])
            .map_err(|e| Error::Protocol(format!("cache decode: {}", e)))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let fresh = doc.node_id == self.local_id
            && now.saturating_sub(doc.timestamp) < CACHE_MAX_AGE.as_secs();
        if !fresh {
            warn!(
                path = %path.display(),
                "routing cache is stale or from another identity, demoting entries"
            );
        }

        let mut restored = 0;
        for cached in doc.entries {
            let node = NodeInfo::new(cached.id, cached.addr);
            if fresh {
                self.put_direct(KBucketEntry::new_reachable(node, None));
            } else {
                self.put(KBucketEntry::new(node));
            }
            restored += 1;
        }
        for cached in doc.replacements {
            self.put(KBucketEntry::new(NodeInfo::new(cached.id, cached.addr)));
        }
        info!(path = %path.display(), restored, fresh, "loaded routing table");
        Ok(restored)
    }

    #[cfg(test)]
    pub(crate) fn check_cover_invariant(&self) {
        // prefixes sorted, pairwise disjoint, jointly covering
        for pair in self.buckets.windows(2) {
            assert!(pair[0].prefix().first_id() < pair[1].prefix().first_id());
            let boundary = pair[1].prefix().first_id();
            assert!(pair[0].prefix().last_id() < boundary);
        }
        assert_eq!(self.buckets[0].prefix().first_id(), Id::MIN);
        assert_eq!(
            self.buckets[self.buckets.len() - 1].prefix().last_id(),
            Id::MAX
        );
        for bucket in &self.buckets {
            for entry in bucket.entries() {
                assert!(bucket.prefix().is_prefix_of(entry.id()));
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    node_id: Id,
    timestamp: u64,
    entries: Vec<CacheEntry>,
    replacements: Vec<CacheEntry>,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    id: Id,
    addr: SocketAddr,
}

impl From<&KBucketEntry> for CacheEntry {
    fn from(entry: &KBucketEntry) -> Self {
        Self {
            id: *entry.id(),
            addr: entry.node().socket_addr(),
        }
    }
}
