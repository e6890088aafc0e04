//! Inbound/outbound throttling and Sybil caps
//!
//! Per-host sliding-window counters bound how much traffic a single
//! remote host may exchange with this node. Inbound overruns are dropped
//! silently; outbound overruns are reported to the caller so lookup logic
//! can deprioritize the endpoint instead of queueing behind it.
//!
//! The Sybil filter tracks how many distinct node ids a host (and a port
//! number) has presented. In developer mode the caps are fixed and low so
//! regression tests can exercise the defense.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{
    DEV_MAX_IDS_PER_ENDPOINT, DEV_MAX_IDS_PER_HOST, THROTTLE_INBOUND_LIMIT,
    THROTTLE_OUTBOUND_LIMIT, THROTTLE_WINDOW,
};
use crate::id::Id;

#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub inbound_limit: u32,
    pub outbound_limit: u32,
    pub window: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            inbound_limit: THROTTLE_INBOUND_LIMIT,
            outbound_limit: THROTTLE_OUTBOUND_LIMIT,
            window: THROTTLE_WINDOW,
        }
    }
}

#[derive(Default)]
struct HostWindow {
    inbound: Vec<Instant>,
    outbound: Vec<Instant>,
}

pub struct Throttle {
    config: ThrottleConfig,
    hosts: HashMap<IpAddr, HostWindow>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            hosts: HashMap::new(),
        }
    }

    /// Record an inbound message; `true` means the host is over budget and
    /// the message must be dropped
    pub fn incoming(&mut self, host: IpAddr) -> bool {
        let now = Instant::now();
        let window = self.config.window;
        let counters = self.hosts.entry(host).or_default();
        counters.inbound.retain(|t| now.duration_since(*t) < window);
        if counters.inbound.len() >= self.config.inbound_limit as usize {
            return true;
        }
        counters.inbound.push(now);
        false
    }

    /// Account an outbound call; `Some(delay)` is the hint after which the
    /// host has budget again
    pub fn outgoing(&mut self, host: IpAddr) -> Option<Duration> {
        let now = Instant::now();
        let window = self.config.window;
        let counters = self.hosts.entry(host).or_default();
        counters.outbound.retain(|t| now.duration_since(*t) < window);
        if counters.outbound.len() >= self.config.outbound_limit as usize {
            let oldest = counters.outbound.first().copied().unwrap_or(now);
            return Some(window.saturating_sub(now.duration_since(oldest)));
        }
        counters.outbound.push(now);
        None
    }

    /// Drop bookkeeping for hosts that went quiet
    pub fn decay(&mut self) {
        let now = Instant::now();
        let window = self.config.window;
        self.hosts.retain(|_, counters| {
            counters.inbound.retain(|t| now.duration_since(*t) < window);
            counters.outbound.retain(|t| now.duration_since(*t) < window);
            !counters.inbound.is_empty() || !counters.outbound.is_empty()
        });
    }
}

/// Tracks id diversity per host and per port to catch cheap identity
/// manufacturing. Only enforced in developer mode, where the caps are
/// small enough for tests; production limits are an operator policy.
pub struct SybilFilter {
    enforce: bool,
    ids_per_host: HashMap<IpAddr, HashSet<Id>>,
    ids_per_port: HashMap<u16, HashSet<Id>>,
}

impl SybilFilter {
    pub fn new(enforce: bool) -> Self {
        Self {
            enforce,
            ids_per_host: HashMap::new(),
            ids_per_port: HashMap::new(),
        }
    }

    /// Observe a sender; `true` means the host exhausted its identity
    /// budget and the message must be dropped without reply
    pub fn observe(&mut self, id: Id, from: SocketAddr) -> bool {
        if !self.enforce {
            return false;
        }

        let host_ids = self.ids_per_host.entry(from.ip()).or_default();
        if !host_ids.contains(&id) && host_ids.len() >= DEV_MAX_IDS_PER_HOST {
            return true;
        }
        let port_ids = self.ids_per_port.entry(from.port()).or_default();
        if !port_ids.contains(&id) && port_ids.len() >= DEV_MAX_IDS_PER_ENDPOINT {
            return true;
        }
        host_ids.insert(id);
        port_ids.insert(id);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: u8, port: u16) -> SocketAddr {
        format!("203.0.113.{}:{}", host, port).parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_limit_and_recovery() {
        let mut throttle = Throttle::new(ThrottleConfig {
            inbound_limit: 4,
            outbound_limit: 4,
            window: Duration::from_secs(1),
        });
        let host = addr(1, 3900).ip();

        for _ in 0..4 {
            assert!(!throttle.incoming(host));
        }
        assert!(throttle.incoming(host));

        // other hosts are unaffected
        assert!(!throttle.incoming(addr(2, 3900).ip()));

        // window slides
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(!throttle.incoming(host));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_delay_hint() {
        let mut throttle = Throttle::new(ThrottleConfig {
            inbound_limit: 2,
            outbound_limit: 2,
            window: Duration::from_secs(1),
        });
        let host = addr(1, 3900).ip();

        assert!(throttle.outgoing(host).is_none());
        assert!(throttle.outgoing(host).is_none());
        let hint = throttle.outgoing(host);
        assert!(hint.is_some());
        assert!(hint.unwrap() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sybil_same_host_cap() {
        let mut filter = SybilFilter::new(true);
        for i in 0..DEV_MAX_IDS_PER_HOST {
            assert!(!filter.observe(Id::random(), addr(1, 4000 + i as u16)));
        }
        // the ninth distinct id from the same host is refused
        assert!(filter.observe(Id::random(), addr(1, 5000)));
        // known ids keep working
        let known = Id::random();
        assert!(!filter.observe(known, addr(2, 4000)));
        assert!(!filter.observe(known, addr(2, 4000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sybil_port_reuse_cap() {
        let mut filter = SybilFilter::new(true);
        for i in 0..DEV_MAX_IDS_PER_ENDPOINT {
            // distinct hosts, same port
            assert!(!filter.observe(
                Id::random(),
                format!("203.0.113.{}:4000", (i % 100) + 1).parse().unwrap()
            ));
        }
        assert!(filter.observe(Id::random(), "203.0.113.200:4000".parse().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_filter_passes_everything() {
        let mut filter = SybilFilter::new(false);
        for _ in 0..100 {
            assert!(!filter.observe(Id::random(), addr(1, 4000)));
        }
    }
}
