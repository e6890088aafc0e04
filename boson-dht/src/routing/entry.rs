//! Bucket entry liveness bookkeeping
//!
//! Every routing-table entry tracks when it was created, when it was last
//! heard from, how many requests to it failed in a row, and a smoothed RTT.
//! `reachable` is only set after a full request/response round trip.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{
    ENTRY_STALE_AFTER, FAILS_MAX, FAILS_STALE, FAILS_UNREACHABLE, PING_BACKOFF_BASE,
    PING_BACKOFF_MAX_EXP, RTT_EWMA_ALPHA,
};
use crate::id::Id;
use crate::node_info::NodeInfo;

#[derive(Clone, Debug)]
pub struct KBucketEntry {
    node: NodeInfo,
    created: Instant,
    last_seen: Instant,
    last_send: Option<Instant>,
    failed_requests: u32,
    reachable: bool,
    avg_rtt: Option<f64>,
}

impl KBucketEntry {
    /// Entry for a node we have heard *of* but not yet verified
    pub fn new(node: NodeInfo) -> Self {
        let now = Instant::now();
        Self {
            node,
            created: now,
            last_seen: now,
            last_send: None,
            failed_requests: 0,
            reachable: false,
            avg_rtt: None,
        }
    }

    /// Entry for a node that just completed a request/response round trip
    pub fn new_reachable(node: NodeInfo, rtt: Option<Duration>) -> Self {
        let mut entry = Self::new(node);
        entry.signal_response(rtt);
        entry
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn id(&self) -> &Id {
        self.node.id()
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn failed_requests(&self) -> u32 {
        self.failed_requests
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn avg_rtt(&self) -> Option<f64> {
        self.avg_rtt
    }

    /// A verified response arrived; failures reset, RTT feeds the EWMA
    pub fn signal_response(&mut self, rtt: Option<Duration>) {
        self.last_seen = Instant::now();
        self.failed_requests = 0;
        self.reachable = true;
        if let Some(rtt) = rtt {
            let sample = rtt.as_secs_f64() * 1000.0;
            self.avg_rtt = Some(match self.avg_rtt {
                Some(avg) => RTT_EWMA_ALPHA * sample + (1.0 - RTT_EWMA_ALPHA) * avg,
                None => sample,
            });
        }
    }

    /// A request was sent toward this node
    pub fn signal_request(&mut self) {
        self.last_send = Some(Instant::now());
    }

    /// A request toward this node timed out
    pub fn signal_request_timeout(&mut self) {
        self.failed_requests = self.failed_requests.saturating_add(1);
    }

    /// The entry has degraded enough that a replacement should take over
    pub fn needs_replacement(&self) -> bool {
        (self.failed_requests > FAILS_UNREACHABLE && !self.reachable)
            || self.failed_requests > FAILS_MAX
            || (self.failed_requests > FAILS_STALE
                && self.last_seen.elapsed() > ENTRY_STALE_AFTER)
    }

    /// Stale or degraded entries want a liveness probe
    pub fn needs_ping(&self) -> bool {
        self.failed_requests > 0 || self.last_seen.elapsed() > ENTRY_STALE_AFTER
    }

    /// Exponential back-off after failures: failure `n` defers the next
    /// ping by `base * 2^min(cap, n - 1)` since the last send
    pub fn is_eligible_for_ping(&self) -> bool {
        if self.failed_requests == 0 {
            return true;
        }
        let Some(last_send) = self.last_send else {
            return true;
        };
        let exp = (self.failed_requests - 1).min(PING_BACKOFF_MAX_EXP);
        last_send.elapsed() >= PING_BACKOFF_BASE * 2u32.pow(exp)
    }

    /// Fold a duplicate observation of the same node into this entry
    pub fn merge(&mut self, other: &KBucketEntry) {
        debug_assert!(self.node == other.node);
        self.created = self.created.min(other.created);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.last_send = match (self.last_send, other.last_send) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if other.reachable {
            self.reachable = true;
            self.failed_requests = self.failed_requests.min(other.failed_requests);
        }
        if let (Some(avg), Some(other_avg)) = (self.avg_rtt, other.avg_rtt) {
            self.avg_rtt = Some(RTT_EWMA_ALPHA * other_avg + (1.0 - RTT_EWMA_ALPHA) * avg);
        } else {
            self.avg_rtt = self.avg_rtt.or(other.avg_rtt);
        }
        if other.version_hint().is_some() {
            self.node.set_version(other.version_hint());
        }
    }

    fn version_hint(&self) -> Option<u32> {
        self.node.version()
    }

    /// Replacement-cache priority: reachable first, then lowest RTT, then
    /// most recently seen, then oldest
    pub fn replacement_order(a: &KBucketEntry, b: &KBucketEntry) -> Ordering {
        b.reachable
            .cmp(&a.reachable)
            .then_with(|| {
                let ra = a.avg_rtt.unwrap_or(f64::MAX);
                let rb = b.avg_rtt.unwrap_or(f64::MAX);
                ra.partial_cmp(&rb).unwrap_or(Ordering::Equal)
            })
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.created.cmp(&b.created))
    }

    #[cfg(test)]
    pub(crate) fn test_set_liveness(&mut self, failed: u32, reachable: bool) {
        self.failed_requests = failed;
        self.reachable = reachable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn entry(port: u16) -> KBucketEntry {
        let addr: SocketAddr = format!("192.0.2.1:{}", port).parse().unwrap();
        KBucketEntry::new(NodeInfo::new(Id::random(), addr))
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_resets_failures() {
        let mut e = entry(1);
        e.signal_request_timeout();
        e.signal_request_timeout();
        assert_eq!(e.failed_requests(), 2);
        assert!(!e.is_reachable());

        e.signal_response(Some(Duration::from_millis(40)));
        assert_eq!(e.failed_requests(), 0);
        assert!(e.is_reachable());
        assert_eq!(e.avg_rtt(), Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtt_ewma() {
        let mut e = entry(1);
        e.signal_response(Some(Duration::from_millis(100)));
        e.signal_response(Some(Duration::from_millis(200)));
        // 0.3 * 200 + 0.7 * 100
        assert!((e.avg_rtt().unwrap() - 130.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_replacement_rules() {
        // unreachable with two failures
        let mut e = entry(1);
        e.signal_request_timeout();
        assert!(!e.needs_replacement());
        e.signal_request_timeout();
        assert!(e.needs_replacement());

        // reachable but many failures
        let mut e = entry(2);
        e.signal_response(None);
        for _ in 0..6 {
            e.signal_request_timeout();
        }
        assert!(e.needs_replacement());

        // reachable, a few failures, long silence
        let mut e = entry(3);
        e.test_set_liveness(3, true);
        assert!(!e.needs_replacement());
        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        assert!(e.needs_replacement());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_backoff() {
        let mut e = entry(1);
        assert!(e.is_eligible_for_ping());

        e.signal_request();
        e.signal_request_timeout();
        tokio::time::advance(Duration::from_secs(30)).await;
        // one failure: 60 s back-off, only 30 s elapsed
        assert!(!e.is_eligible_for_ping());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(e.is_eligible_for_ping());

        // three failures: 240 s back-off since the last send
        e.signal_request_timeout();
        e.signal_request_timeout();
        e.signal_request();
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!e.is_eligible_for_ping());
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(e.is_eligible_for_ping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_order() {
        let mut reachable_fast = entry(1);
        reachable_fast.signal_response(Some(Duration::from_millis(10)));
        let mut reachable_slow = entry(2);
        reachable_slow.signal_response(Some(Duration::from_millis(500)));
        let unreachable = entry(3);

        let mut list = vec![unreachable.clone(), reachable_slow.clone(), reachable_fast.clone()];
        list.sort_by(KBucketEntry::replacement_order);

        assert_eq!(list[0].id(), reachable_fast.id());
        assert_eq!(list[1].id(), reachable_slow.id());
        assert_eq!(list[2].id(), unreachable.id());
    }
}
