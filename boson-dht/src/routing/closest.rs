//! K-closest query over the routing table
//!
//! Starts at the bucket covering the target and expands outward, at each
//! step taking the neighbor whose nearer edge is XOR-closer to the target,
//! until enough entries are collected. The final list is sorted by
//! distance and truncated.

use crate::id::Id;
use crate::node_info::NodeInfo;
use crate::routing::entry::KBucketEntry;
use crate::routing::table::RoutingTable;

pub struct KClosestNodes<'a> {
    table: &'a RoutingTable,
    target: Id,
    capacity: usize,
    include_replacements: bool,
    filter: Box<dyn Fn(&KBucketEntry) -> bool + 'a>,
}

impl<'a> KClosestNodes<'a> {
    pub fn new(table: &'a RoutingTable, target: Id, capacity: usize) -> Self {
        Self {
            table,
            target,
            capacity,
            include_replacements: false,
            // degraded entries are poor referrals
            filter: Box::new(|e| !e.needs_replacement()),
        }
    }

    /// Replace the eligibility predicate
    pub fn filter(mut self, filter: impl Fn(&KBucketEntry) -> bool + 'a) -> Self {
        self.filter = Box::new(filter);
        self
    }

    /// Also consider verified replacement entries
    pub fn include_replacements(mut self) -> Self {
        self.include_replacements = true;
        self
    }

    /// Collect, sort by XOR distance to the target, truncate to capacity
    pub fn fill(self) -> Vec<NodeInfo> {
        let buckets = self.table.buckets();
        let center = self.table.index_of(&self.target);

        let mut collected: Vec<NodeInfo> = Vec::with_capacity(self.capacity * 2);
        self.take_from(&mut collected, center);

        let mut low = center.wrapping_sub(1);
        let mut high = center + 1;
        while collected.len() < self.capacity {
            let low_alive = low != usize::MAX;
            let high_alive = high < buckets.len();
            match (low_alive, high_alive) {
                (false, false) => break,
                (true, false) => {
                    self.take_from(&mut collected, low);
                    low = low.wrapping_sub(1);
                }
                (false, true) => {
                    self.take_from(&mut collected, high);
                    high += 1;
                }
                (true, true) => {
                    // nearer edge decides: the low side's largest id vs the
                    // high side's smallest id
                    let low_edge = buckets[low].prefix().last_id();
                    let high_edge = buckets[high].prefix().first_id();
                    if self.target.three_way_compare(&low_edge, &high_edge)
                        != std::cmp::Ordering::Greater
                    {
                        self.take_from(&mut collected, low);
                        low = low.wrapping_sub(1);
                    } else {
                        self.take_from(&mut collected, high);
                        high += 1;
                    }
                }
            }
        }

        let target = self.target;
        collected.sort_by(|a, b| target.three_way_compare(a.id(), b.id()));
        collected.truncate(self.capacity);
        collected
    }

    fn take_from(&self, collected: &mut Vec<NodeInfo>, idx: usize) {
        let bucket = &self.table.buckets()[idx];
        for entry in bucket.entries() {
            if (self.filter)(entry) {
                collected.push(entry.node().clone());
            }
        }
        if self.include_replacements {
            for entry in bucket.replacements() {
                if entry.is_reachable() && (self.filter)(entry) {
                    collected.push(entry.node().clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::entry::KBucketEntry;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addr(n: u16) -> SocketAddr {
        format!("192.0.2.{}:{}", (n % 200) + 1, 4000 + n)
            .parse()
            .unwrap()
    }

    fn table_with(local: Id, count: u16) -> (RoutingTable, Vec<Id>) {
        let mut table = RoutingTable::new(local);
        let mut ids = Vec::new();
        for n in 0..count {
            let id = Id::random();
            ids.push(id);
            table.put(KBucketEntry::new_reachable(
                NodeInfo::new(id, addr(n)),
                Some(Duration::from_millis(10)),
            ));
        }
        (table, ids)
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_truly_closest() {
        let (table, mut ids) = table_with(Id::MIN, 200);
        let target = Id::random();

        let found = KClosestNodes::new(&table, target, 8).fill();
        assert_eq!(found.len(), 8);

        // brute-force ground truth over every inserted id that survived
        ids.sort_by(|a, b| target.three_way_compare(a, b));
        let inserted: std::collections::HashSet<Id> = table
            .buckets()
            .iter()
            .flat_map(|b| b.entries().iter().map(|e| *e.id()))
            .collect();
        let mut truth: Vec<Id> = ids.into_iter().filter(|i| inserted.contains(i)).collect();
        truth.truncate(8);

        let found_ids: Vec<Id> = found.iter().map(|n| *n.id()).collect();
        assert_eq!(found_ids, truth);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sorted_by_distance() {
        let (table, _) = table_with(Id::MIN, 64);
        let target = Id::random();
        let found = KClosestNodes::new(&table, target, 16).fill();

        for pair in found.windows(2) {
            assert_ne!(
                target.three_way_compare(pair[0].id(), pair[1].id()),
                std::cmp::Ordering::Greater
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_table_returns_all() {
        let (table, _) = table_with(Id::MIN, 3);
        let found = KClosestNodes::new(&table, Id::random(), 8).fill();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_applies() {
        let (table, ids) = table_with(Id::MIN, 10);
        let excluded = ids[0];
        let found = KClosestNodes::new(&table, Id::random(), 16)
            .filter(move |e| *e.id() != excluded)
            .fill();
        assert!(found.iter().all(|n| *n.id() != excluded));
    }
}
