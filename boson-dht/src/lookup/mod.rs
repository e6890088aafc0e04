//! Iterative lookup state
//!
//! The candidate queue and closest set are plain data structures so the
//! convergence logic is testable without sockets; the async driver in
//! [`engine`] layers α-parallel RPC on top.

pub mod engine;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::id::Id;
use crate::node_info::NodeInfo;
use crate::util;

pub use engine::{LookupEngine, LookupMode};

/// A node that answered during a lookup, with the write token it issued
#[derive(Debug, Clone)]
pub struct Responder {
    pub node: NodeInfo,
    pub token: Option<u32>,
}

struct QueueEntry {
    distance: Id,
    node: NodeInfo,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    // BinaryHeap is a max-heap; invert so the nearest pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other.distance.cmp(&self.distance)
    }
}

/// Unqueried candidates ordered by XOR distance to the target
pub struct CandidateQueue {
    target: Id,
    seen: HashSet<Id>,
    heap: BinaryHeap<QueueEntry>,
}

impl CandidateQueue {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            seen: HashSet::new(),
            heap: BinaryHeap::new(),
        }
    }

    /// Add a referral. Duplicates, the local node and (outside developer
    /// mode) bogon endpoints are dropped.
    pub fn add(&mut self, node: NodeInfo, local_id: &Id, allow_bogons: bool) {
        if node.id() == local_id {
            return;
        }
        if !allow_bogons && util::is_bogon(&node.socket_addr()) {
            return;
        }
        if !self.seen.insert(*node.id()) {
            return;
        }
        self.heap.push(QueueEntry {
            distance: self.target.distance(node.id()),
            node,
        });
    }

    /// Nearest unqueried candidate
    pub fn pop(&mut self) -> Option<NodeInfo> {
        self.heap.pop().map(|entry| entry.node)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Distance of the nearest waiting candidate
    pub fn head_distance(&self) -> Option<Id> {
        self.heap.peek().map(|entry| entry.distance)
    }
}

/// The K best confirmed responders, sorted by distance to the target
pub struct ClosestSet {
    target: Id,
    capacity: usize,
    entries: Vec<Responder>,
}

impl ClosestSet {
    pub fn new(target: Id, capacity: usize) -> Self {
        Self {
            target,
            capacity,
            entries: Vec::with_capacity(capacity + 1),
        }
    }

    pub fn insert(&mut self, node: NodeInfo, token: Option<u32>) {
        if let Some(existing) = self.entries.iter_mut().find(|r| r.node.id() == node.id()) {
            if token.is_some() {
                existing.token = token;
            }
            return;
        }
        let target = self.target;
        let pos = self
            .entries
            .partition_point(|r| target.three_way_compare(r.node.id(), node.id()) != Ordering::Greater);
        self.entries.insert(pos, Responder { node, token });
        self.entries.truncate(self.capacity);
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Distance of the worst member, when full
    pub fn tail_distance(&self) -> Option<Id> {
        if !self.is_full() {
            return None;
        }
        self.entries
            .last()
            .map(|r| self.target.distance(r.node.id()))
    }

    /// Whether a candidate at `distance` could still enter the set
    pub fn would_admit(&self, distance: &Id) -> bool {
        match self.tail_distance() {
            None => true,
            Some(tail) => *distance < tail,
        }
    }

    pub fn responders(&self) -> &[Responder] {
        &self.entries
    }

    pub fn into_responders(self) -> Vec<Responder> {
        self.entries
    }

    pub fn find(&self, id: &Id) -> Option<&Responder> {
        self.entries.iter().find(|r| r.node.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
