// Queue constants (No magic values)
use std::time::Duration;

/// Lease-expiry sweep period (15s)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Poll period for long-poll getWork (100ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period before running jobs are failed at shutdown (60s)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on records visited by a dependency-graph traversal
pub const MAX_DEPENDENCY_SCAN: usize = 10_000;

/// Waiting jobs re-derived per sweep tick
pub const RECONCILE_BATCH: usize = 500;

pub const SHUTDOWN_FAILURE_REASON: &str = "Running at job server shutdown";
pub const LEASE_EXPIRED_REASON: &str = "Lease expired";

// History messages
pub const MSG_SUBMITTED: &str = "Job submitted";
pub const MSG_RUNNING: &str = "Job running";
pub const MSG_COMPLETED: &str = "Job completed";
pub const MSG_FAILED: &str = "Job failed";
pub const MSG_RETRY: &str = "Job failed, retry scheduled";
pub const MSG_CANCELLED: &str = "Job cancelled";
pub const MSG_PAUSED: &str = "Job paused";
pub const MSG_RESUMED: &str = "Job resumed";
pub const MSG_RESTARTED: &str = "Job restarted";
pub const MSG_READIED: &str = "Job readied";
pub const MSG_RERUN: &str = "Job rerun";
pub const MSG_REPEAT: &str = "Repeating job submitted";
pub const MSG_LEASE_EXPIRED: &str = "Lease expired";
