//! Protocol constants and default configuration knobs.

/// Default port a node binds when none is configured.
pub const DEFAULT_PORT: u16 = 8888;

/// Hard cap on the local peer roster.
pub const MAX_PEERS: usize = 10;

/// Seconds between heartbeats to each peer.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Liveness deadline after which a peer becomes a failure candidate.
pub const NODE_TIMEOUT_SECS: u64 = 90;

/// Consecutive failure-sweep strikes before a peer is force-removed.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Data-exchange chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Per-reliable-message resend interval in seconds.
pub const RETRY_TIMEOUT_SECS: u64 = 30;

/// Reliable message attempts before the message is declared failed.
pub const MAX_RETRIES: u32 = 3;

/// Seconds between routing-table recomputations.
pub const ROUTE_REFRESH_SECS: u64 = 30;

/// Seconds between topology integrity sweeps.
pub const INTEGRITY_SWEEP_SECS: u64 = 60;

/// Seconds between cleanup passes (seen messages, acks, transfers).
pub const CLEANUP_INTERVAL_SECS: u64 = 300;

/// Age in seconds past which a seen-message fingerprint is evicted.
pub const SEEN_MESSAGE_TTL_SECS: u64 = 300;

/// Age in seconds past which a discovered-but-unconnected peer entry is
/// dropped from the discovery cache.
pub const DISCOVERY_STALE_SECS: u64 = 300;

/// Age in seconds past which terminal transfers are dropped.
pub const TRANSFER_CLEANUP_SECS: u64 = 3600;

/// Replay window for join-request timestamps, in seconds either side of the
/// local clock.
pub const JOIN_REPLAY_WINDOW_SECS: u64 = 60;
