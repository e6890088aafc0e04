//! Boson Kademlia DHT
//!
//! A Kademlia overlay keyed by 256-bit Ed25519 public keys, providing
//! identifier-addressed storage for immutable, signed and encrypted values
//! and for service peer announcements.
//!
//! The crate is organized bottom-up:
//!
//! - [`id`] / [`prefix`]: identifier algebra over the 256-bit XOR space
//! - [`node_info`] / [`peer_info`] / [`value`]: the record model
//! - [`routing`]: k-buckets and the binary-trie routing table
//! - [`wire`]: the self-describing message envelope and both codecs
//! - [`rpc`]: the per-family UDP server, call matching and defenses
//! - [`lookup`]: iterative alpha-parallel lookups and write fan-out
//! - [`node`]: the runtime that wires it all together

pub mod config;
pub mod constants;
pub mod crypto_cache;
pub mod error;
pub mod id;
pub mod lookup;
pub mod node;
pub mod node_info;
pub mod peer_info;
pub mod prefix;
pub mod routing;
pub mod rpc;
pub mod storage;
pub mod util;
pub mod value;
pub mod wire;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use id::Id;
pub use lookup::LookupMode;
pub use node::{
    AddressFamily, ConnectionStatus, LookupOptions, Node, StatusEvent, StoreOptions,
};
pub use node_info::NodeInfo;
pub use peer_info::PeerInfo;
pub use storage::{DataStorage, MemoryStorage};
pub use value::Value;
