//! Node contact records
//!
//! A [`NodeInfo`] is the routable identity of one DHT node: its id plus a
//! socket address, with the protocol version observed on the wire when the
//! node has spoken to us.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::id::Id;

#[derive(Clone, Eq)]
pub struct NodeInfo {
    id: Id,
    addr: SocketAddr,
    version: Option<u32>,
}

impl NodeInfo {
    pub fn new(id: Id, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            version: None,
        }
    }

    pub fn with_version(id: Id, addr: SocketAddr, version: Option<u32>) -> Self {
        Self { id, addr, version }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn set_version(&mut self, version: Option<u32>) {
        self.version = version;
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// Loose collision test: two records match when either the id or the
    /// endpoint collides. Used by the impersonation guard.
    pub fn matches(&self, other: &NodeInfo) -> bool {
        self.id == other.id || self.addr == other.addr
    }
}

// Strict equality requires both id and endpoint; the observed version is
// incidental.
impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.addr == other.addr
    }
}

impl std::hash::Hash for NodeInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.addr.hash(state);
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

impl fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeInfo({:?}, {})", self.id, self.addr)
    }
}
