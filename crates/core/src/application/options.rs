// Operation options

use crate::domain::{JobId, JobType, LogLevel};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Cancel other repeating jobs of the same type first
    pub cancel_repeats: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetJobOptions {
    pub get_log: bool,
    pub get_failures: bool,
}

impl GetJobOptions {
    pub fn full() -> Self {
        Self {
            get_log: true,
            get_failures: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetWorkRequest {
    pub job_types: Vec<JobType>,
    pub max_jobs: usize,
    /// Lease length (ms); falls back to the configured default
    pub work_timeout: Option<i64>,
    /// Long-poll bound; `None` returns immediately
    pub wait: Option<Duration>,
}

impl GetWorkRequest {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_types: vec![JobType::new(job_type)],
            max_jobs: 1,
            work_timeout: None,
            wait: None,
        }
    }

    pub fn max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn work_timeout(mut self, work_timeout: i64) -> Self {
        self.work_timeout = Some(work_timeout);
        self
    }

    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressOptions {
    /// Re-stamp the lease expiry as now + work_timeout
    pub work_timeout: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: LogLevel,
    pub data: Option<serde_json::Value>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            data: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DoneOptions {
    /// Report the id of the next repeat occurrence
    pub repeat_id: bool,
    /// Delay promoted dependents by this many ms
    pub delay_deps: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoneOutcome {
    pub completed: bool,
    pub repeat_id: Option<JobId>,
}

#[derive(Debug, Clone, Default)]
pub struct FailOptions {
    pub fatal: bool,
    /// Cancel dependents when the failure is permanent
    pub dependents: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReadyOptions {
    /// New `after`; defaults to now
    pub time: Option<i64>,
    /// Resolve every antecedent and void any live lease
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct CancelOptions {
    pub antecedents: bool,
    pub dependents: bool,
}

impl Default for CancelOptions {
    fn default() -> Self {
        Self {
            antecedents: false,
            dependents: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestartOptions {
    /// Retry budget after restart; defaults to the budget given at creation
    pub retries: Option<i64>,
    pub until: Option<i64>,
    pub antecedents: bool,
    pub dependents: bool,
}

impl Default for RestartOptions {
    fn default() -> Self {
        Self {
            retries: None,
            until: None,
            antecedents: true,
            dependents: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Allow removal from any status except running
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RerunOptions {
    pub repeats: i64,
    pub until: Option<i64>,
    /// Delay before the new occurrence is eligible (ms)
    pub wait: i64,
}
