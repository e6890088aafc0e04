//! Protocol and runtime constants

use std::time::Duration;

// ========== KADEMLIA PARAMETERS ==========

/// Bucket capacity and result-set size
pub const K: usize = 8;

/// Lookup parallelism: concurrent RPCs per iterative lookup
pub const ALPHA: usize = 3;

/// Replacement cache size per bucket
pub const MAX_REPLACEMENTS: usize = 8;

// ========== ENTRY LIVENESS ==========

/// RTT smoothing factor for the per-entry EWMA
pub const RTT_EWMA_ALPHA: f64 = 0.3;

/// Failures after which an unreachable entry needs replacement
pub const FAILS_UNREACHABLE: u32 = 1;

/// Failures after which any entry needs replacement
pub const FAILS_MAX: u32 = 5;

/// Failures combined with staleness that flag an entry
pub const FAILS_STALE: u32 = 2;

/// Staleness window paired with `FAILS_STALE`
pub const ENTRY_STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Base interval of the ping back-off (doubles per failure, capped)
pub const PING_BACKOFF_BASE: Duration = Duration::from_secs(60);

/// Exponent cap of the ping back-off
pub const PING_BACKOFF_MAX_EXP: u32 = 5;

// ========== RPC ==========

/// Floor of the adaptive per-call timeout
pub const RPC_CALL_TIMEOUT_MIN: Duration = Duration::from_secs(2);

/// Hard cap of the per-call timeout; late responses past the adaptive
/// deadline but inside this window still feed bucket liveness
pub const RPC_CALL_TIMEOUT_MAX: Duration = Duration::from_secs(10);

/// Largest datagram the server will emit; responses are truncated to K
/// entries by construction so this is never approached
pub const MAX_PACKET_SIZE: usize = 1400;

/// Shortest datagram that can possibly hold a valid message
pub const MIN_MESSAGE_SIZE: usize = 10;

/// Write-token secret rotation interval; the previous secret stays valid
/// for one further interval (grace window)
pub const TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Inbound messages allowed per host per sliding window
pub const THROTTLE_INBOUND_LIMIT: u32 = 128;

/// Outbound calls allowed per host per sliding window
pub const THROTTLE_OUTBOUND_LIMIT: u32 = 128;

/// Length of the throttling window
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// Dev-mode cap on distinct node ids observed from one host
pub const DEV_MAX_IDS_PER_HOST: usize = 8;

/// Dev-mode cap on distinct node ids reusing one (host, port) endpoint
pub const DEV_MAX_IDS_PER_ENDPOINT: usize = 32;

// ========== LOOKUP ==========

/// Outer clock on a whole iterative lookup
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

// ========== MAINTENANCE ==========

/// A bucket is refreshed when it has not been touched in this window
pub const BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Re-announce interval for records stored with `persistent = true`
pub const RE_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Lifetime of non-persistent stored values
pub const VALUE_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60);

/// Lifetime of non-persistent peer announcements
pub const PEER_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60);

/// Cadence of the node maintenance tick
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);

/// Cadence of routing-table snapshots
pub const CACHE_SAVE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A routing-table snapshot older than this is distrusted on load
pub const CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Routing cache file names per address family
pub const CACHE_FILE_V4: &str = "dht4.cache";
pub const CACHE_FILE_V6: &str = "dht6.cache";
