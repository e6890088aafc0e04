//! K-bucket
//!
//! One bucket covers exactly one prefix of the identifier space. Up to
//! [`K`] main entries are kept in ascending creation order; up to
//! [`MAX_REPLACEMENTS`] replacement entries wait behind them, ordered by
//! replacement priority.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::constants::{BUCKET_REFRESH_INTERVAL, K, MAX_REPLACEMENTS};
use crate::id::Id;
use crate::prefix::Prefix;
use crate::routing::entry::KBucketEntry;

#[derive(Debug)]
pub struct KBucket {
    prefix: Prefix,
    home: bool,
    entries: Vec<KBucketEntry>,
    replacements: Vec<KBucketEntry>,
    last_refresh: Option<Instant>,
}

impl KBucket {
    pub fn new(prefix: Prefix, home: bool) -> Self {
        Self {
            prefix,
            home,
            entries: Vec::with_capacity(K),
            replacements: Vec::with_capacity(MAX_REPLACEMENTS),
            last_refresh: None,
        }
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// The home bucket covers the local node id
    pub fn is_home(&self) -> bool {
        self.home
    }

    pub fn entries(&self) -> &[KBucketEntry] {
        &self.entries
    }

    pub fn replacements(&self) -> &[KBucketEntry] {
        &self.replacements
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= K
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.entries.iter().any(|e| e.id() == id)
    }

    pub fn find(&self, id: &Id) -> Option<&KBucketEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn any_needs_replacement(&self) -> bool {
        self.entries.iter().any(KBucketEntry::needs_replacement)
    }

    /// Insert or update an entry.
    ///
    /// Exact duplicates merge forward. Partial collisions (same id with a
    /// different address, or same address with a different id) keep the
    /// incumbent: impersonation and IP rotation must not displace state.
    pub fn put(&mut self, new: KBucketEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.node() == new.node()) {
            existing.merge(&new);
            return;
        }
        if let Some(conflict) = self.entries.iter().find(|e| e.node().matches(new.node())) {
            warn!(
                incumbent = %conflict.node(),
                candidate = %new.node(),
                "inconsistent routing entry, keeping incumbent"
            );
            return;
        }

        if new.is_reachable() {
            if !self.is_full() {
                // a node waiting in the replacement cache merges forward
                let merged = match self.remove_replacement(new.id()) {
                    Some(mut waiting) if waiting.node() == new.node() => {
                        waiting.merge(&new);
                        waiting
                    }
                    _ => new,
                };
                self.insert_main(merged);
                return;
            }
            if let Some(pos) = self.entries.iter().position(KBucketEntry::needs_replacement) {
                self.entries.remove(pos);
                self.insert_main(new);
                return;
            }
            // full of healthy entries: flag the bucket for a refresh probe
            // and keep the newcomer as a replacement
            self.last_refresh = None;
        }
        self.insert_replacement(new);
    }

    fn insert_main(&mut self, entry: KBucketEntry) {
        debug_assert!(self.prefix.is_prefix_of(entry.id()));
        let pos = self
            .entries
            .partition_point(|e| e.created() <= entry.created());
        self.entries.insert(pos, entry);
    }

    fn insert_replacement(&mut self, new: KBucketEntry) {
        if let Some(existing) = self.replacements.iter_mut().find(|e| e.node() == new.node()) {
            existing.merge(&new);
        } else {
            self.replacements.push(new);
        }
        self.replacements.sort_by(KBucketEntry::replacement_order);
        self.replacements.truncate(MAX_REPLACEMENTS);
    }

    fn remove_replacement(&mut self, id: &Id) -> Option<KBucketEntry> {
        let pos = self.replacements.iter().position(|e| e.id() == id)?;
        Some(self.replacements.remove(pos))
    }

    /// A response from `id` completed a round trip
    pub fn on_response(&mut self, id: &Id, rtt: Option<Duration>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id() == id) {
            entry.signal_response(rtt);
            return;
        }
        if let Some(mut entry) = self.remove_replacement(id) {
            entry.signal_response(rtt);
            self.put(entry);
        }
    }

    /// A request toward `id` was sent
    pub fn on_send(&mut self, id: &Id) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id() == id) {
            entry.signal_request();
        } else if let Some(entry) = self.replacements.iter_mut().find(|e| e.id() == id) {
            entry.signal_request();
        }
    }

    /// A request toward `id` timed out
    pub fn on_timeout(&mut self, id: &Id) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id() == id) {
            entry.signal_request_timeout();
        } else if let Some(entry) = self.replacements.iter_mut().find(|e| e.id() == id) {
            entry.signal_request_timeout();
        }
    }

    /// Swap degraded main entries for verified replacements
    pub fn promote_replacements(&mut self) {
        while let Some(pos) = self.entries.iter().position(KBucketEntry::needs_replacement) {
            let candidate = self
                .replacements
                .first()
                .filter(|r| r.is_reachable() && !r.needs_replacement())
                .is_some();
            if !candidate {
                break;
            }
            let replacement = self.replacements.remove(0);
            self.entries.remove(pos);
            self.insert_main(replacement);
        }
    }

    /// Occupancy that survives a merge: healthy entries plus verified
    /// replacements
    pub fn effective_size(&self) -> usize {
        let healthy = self
            .entries
            .iter()
            .filter(|e| !e.needs_replacement())
            .count();
        let eligible = self
            .replacements
            .iter()
            .filter(|r| r.is_reachable() && !r.needs_replacement())
            .count();
        healthy + eligible
    }

    /// Direct placement during a bucket split; the parent already enforced
    /// capacity and ordering
    pub(crate) fn push_entry_for_split(&mut self, entry: KBucketEntry) {
        debug_assert!(self.prefix.is_prefix_of(entry.id()));
        debug_assert!(self.entries.len() < K);
        self.entries.push(entry);
    }

    pub(crate) fn push_replacement_for_split(&mut self, entry: KBucketEntry) {
        self.insert_replacement(entry);
    }

    /// Drain every entry and replacement, leaving the bucket empty
    pub fn drain(&mut self) -> (Vec<KBucketEntry>, Vec<KBucketEntry>) {
        (
            std::mem::take(&mut self.entries),
            std::mem::take(&mut self.replacements),
        )
    }

    pub fn mark_refreshed(&mut self) {
        self.last_refresh = Some(Instant::now());
    }

    /// Refresh is due when the window elapsed (or was reset) and some
    /// entry wants a probe
    pub fn needs_refresh(&self) -> bool {
        let window_open = self
            .last_refresh
            .map_or(true, |t| t.elapsed() > BUCKET_REFRESH_INTERVAL);
        window_open
            && !self.is_empty()
            && self
                .entries
                .iter()
                .any(|e| e.needs_ping() && e.is_eligible_for_ping())
    }

    /// Entries eligible for a maintenance ping right now
    pub fn entries_to_ping(&self) -> Vec<crate::node_info::NodeInfo> {
        self.entries
            .iter()
            .filter(|e| e.needs_ping() && e.is_eligible_for_ping())
            .map(|e| e.node().clone())
            .collect()
    }
}
