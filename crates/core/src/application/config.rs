// Queue Configuration

use crate::application::constants::{
    DEFAULT_POLL_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_SWEEP_INTERVAL,
};
use std::time::Duration;

/// Engine tuning, one instance per deployment
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often expired leases are repossessed
    pub sweep_interval: Duration,
    /// Lease length applied when getWork does not name one (ms)
    pub default_work_timeout: Option<i64>,
    /// Poll period while a long-poll getWork waits
    pub poll_interval: Duration,
    /// Default grace period for shutdownJobServer
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            default_work_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}
