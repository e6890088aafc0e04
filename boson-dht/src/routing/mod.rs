//! K-buckets and the binary-trie routing table
//!
//! Liveness bookkeeping lives in [`entry`], the per-prefix bucket
//! discipline in [`bucket`], the split/merge trie and snapshot persistence
//! in [`table`], and the k-closest query in [`closest`].

pub mod bucket;
pub mod closest;
pub mod entry;
pub mod table;

pub use bucket::KBucket;
pub use closest::KClosestNodes;
pub use entry::KBucketEntry;
pub use table::RoutingTable;
