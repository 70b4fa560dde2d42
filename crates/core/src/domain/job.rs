// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::schedule::CalendarSchedule;
use crate::domain::status::JobStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job ID (UUID v4 unless supplied by the client)
pub type JobId = String;

/// Lease identifier, fresh for every claim
pub type RunId = String;

/// Priority (lower number = runs first)
pub type Priority = i32;

/// Sentinel for "repeat forever"
pub const FOREVER: i64 = i64::MAX;

/// Named priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Low,
    Normal,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn value(self) -> Priority {
        match self {
            PriorityLevel::Low => 10,
            PriorityLevel::Normal => 0,
            PriorityLevel::Medium => -5,
            PriorityLevel::High => -10,
            PriorityLevel::Critical => -20,
        }
    }
}

impl FromStr for PriorityLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(PriorityLevel::Low),
            "normal" => Ok(PriorityLevel::Normal),
            "medium" => Ok(PriorityLevel::Medium),
            "high" => Ok(PriorityLevel::High),
            "critical" => Ok(PriorityLevel::Critical),
            other => Err(DomainError::InvalidPriority(other.to_string())),
        }
    }
}

/// Parse either a level name or an explicit integer
pub fn parse_priority(s: &str) -> Result<Priority> {
    if let Ok(value) = s.trim().parse::<Priority>() {
        return Ok(value);
    }
    Ok(s.trim().parse::<PriorityLevel>()?.value())
}

/// Job Type (the tag workers filter on)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job Payload (opaque to the engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl Default for JobPayload {
    fn default() -> Self {
        Self(serde_json::json!({}))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Danger,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Danger => "danger",
        }
    }
}

impl FromStr for LogLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(LogLevel::Info),
            "success" => Ok(LogLevel::Success),
            "warning" => Ok(LogLevel::Warning),
            "danger" => Ok(LogLevel::Danger),
            other => Err(DomainError::ValidationError(format!(
                "Unknown log level: {}",
                other
            ))),
        }
    }
}

/// Worker-reported progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: f64,
    pub total: f64,
    pub percent: f64,
}

impl Progress {
    pub fn new(completed: f64, total: f64) -> Result<Self> {
        if !(completed >= 0.0 && total > 0.0 && completed <= total) {
            return Err(DomainError::ValidationError(format!(
                "Invalid progress: {} of {}",
                completed, total
            )));
        }
        Ok(Self {
            completed,
            total,
            percent: 100.0 * completed / total,
        })
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            completed: 0.0,
            total: 1.0,
            percent: 0.0,
        }
    }
}

/// One entry of the append-only job history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: i64,
    pub run_id: Option<RunId>,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub progress: Option<Progress>,
}

impl LogEntry {
    pub fn new(time: i64, run_id: Option<RunId>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time,
            run_id,
            level,
            message: message.into(),
            data: None,
            progress: None,
        }
    }
}

/// One entry of the append-only failure history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub time: i64,
    pub run_id: Option<RunId>,
    pub error: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    Constant,
    Exponential,
}

impl RetryBackoff {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryBackoff::Constant => "constant",
            RetryBackoff::Exponential => "exponential",
        }
    }
}

impl FromStr for RetryBackoff {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constant" => Ok(RetryBackoff::Constant),
            "exponential" => Ok(RetryBackoff::Exponential),
            other => Err(DomainError::ValidationError(format!(
                "Unknown retry backoff: {}",
                other
            ))),
        }
    }
}

/// Delay between repeat occurrences: fixed milliseconds or a calendar schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatWait {
    Delay(i64),
    Schedule(CalendarSchedule),
}

impl Default for RepeatWait {
    fn default() -> Self {
        RepeatWait::Delay(DEFAULT_WAIT_MS)
    }
}

/// Default retry and repeat wait (5 minutes)
pub const DEFAULT_WAIT_MS: i64 = 5 * 60 * 1000;

/// Retry settings requested at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    pub retries: i64,
    pub until: Option<i64>,
    pub wait: i64,
    pub backoff: RetryBackoff,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            until: None,
            wait: DEFAULT_WAIT_MS,
            backoff: RetryBackoff::Constant,
        }
    }
}

/// Repeat settings requested at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatOptions {
    pub repeats: i64,
    pub until: Option<i64>,
    pub wait: RepeatWait,
}

impl Default for RepeatOptions {
    fn default() -> Self {
        Self {
            repeats: 0,
            until: None,
            wait: RepeatWait::default(),
        }
    }
}

/// Client request for a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Client-chosen id; generated when absent
    pub id: Option<JobId>,
    pub job_type: JobType,
    pub data: JobPayload,
    pub priority: Priority,
    pub depends: Vec<JobId>,
    pub retry: RetryOptions,
    pub repeat: RepeatOptions,
    /// Absolute earliest start (epoch ms)
    pub after: Option<i64>,
    /// Relative delay from save time (ms), applied when `after` is absent
    pub delay: Option<i64>,
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: None,
            job_type: JobType::new(job_type),
            data: JobPayload::new(data),
            priority: PriorityLevel::Normal.value(),
            depends: Vec::new(),
            retry: RetryOptions::default(),
            repeat: RepeatOptions::default(),
            after: None,
            delay: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn priority_level(self, level: PriorityLevel) -> Self {
        self.priority(level.value())
    }

    pub fn depends(mut self, depends: Vec<JobId>) -> Self {
        self.depends = depends;
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn repeat(mut self, repeat: RepeatOptions) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn after(mut self, after: i64) -> Self {
        self.after = Some(after);
        self
    }

    pub fn delay(mut self, delay_ms: i64) -> Self {
        self.delay = Some(delay_ms);
        self
    }
}

/// Job Record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    // Identity
    pub id: JobId,
    pub run_id: Option<RunId>,

    // Classification
    pub job_type: JobType,
    pub priority: Priority,
    pub status: JobStatus,

    // Payload
    pub data: JobPayload,
    pub result: Option<serde_json::Value>,
    pub progress: Progress,

    // Dependency edges
    pub depends: Vec<JobId>,
    pub resolved: Vec<JobId>,

    // Timing (epoch ms)
    pub after: i64,
    pub updated: i64,
    pub work_timeout: Option<i64>,
    pub expires_after: Option<i64>,

    // History
    pub log: Vec<LogEntry>,
    pub failures: Vec<FailureRecord>,

    // Retry policy
    pub retries: i64,
    pub retried: i64,
    pub repeat_retries: i64,
    pub retry_until: Option<i64>,
    pub retry_wait: i64,
    pub retry_backoff: RetryBackoff,

    // Repeat policy
    pub repeats: i64,
    pub repeated: i64,
    pub repeat_until: Option<i64>,
    pub repeat_wait: RepeatWait,

    pub created: i64,
}

impl Job {
    /// Create a new job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created` - Creation timestamp in epoch ms (injected, not system time)
    /// * `job_type` - Job type
    /// * `payload` - Job payload
    pub fn new(id: impl Into<String>, created: i64, job_type: JobType, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            run_id: None,
            job_type,
            priority: PriorityLevel::Normal.value(),
            status: JobStatus::Ready,
            data: payload,
            result: None,
            progress: Progress::default(),
            depends: Vec::new(),
            resolved: Vec::new(),
            after: created,
            updated: created,
            work_timeout: None,
            expires_after: None,
            log: Vec::new(),
            failures: Vec::new(),
            retries: 0,
            retried: 0,
            repeat_retries: 0,
            retry_until: None,
            retry_wait: DEFAULT_WAIT_MS,
            retry_backoff: RetryBackoff::Constant,
            repeats: 0,
            repeated: 0,
            repeat_until: None,
            repeat_wait: RepeatWait::default(),
            created,
        }
    }

    /// Build the record for a client request. `resolved` lists antecedents
    /// already completed at save time.
    pub fn from_spec(spec: JobSpec, id: JobId, now: i64, resolved: Vec<JobId>) -> Self {
        let after = spec
            .after
            .unwrap_or_else(|| now.saturating_add(spec.delay.unwrap_or(0).max(0)));

        let mut job = Self::new(id, now, spec.job_type, spec.data);
        job.priority = spec.priority;
        job.depends = spec.depends;
        job.resolved = resolved
            .into_iter()
            .filter(|r| job.depends.contains(r))
            .collect();
        job.after = after;
        job.retries = spec.retry.retries;
        job.repeat_retries = spec.retry.retries;
        job.retry_until = spec.retry.until;
        job.retry_wait = spec.retry.wait;
        job.retry_backoff = spec.retry.backoff;
        job.repeats = spec.repeat.repeats;
        job.repeat_until = spec.repeat.until;
        job.repeat_wait = spec.repeat.wait;
        job.status = job.eligible_status();
        job
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(job_type: JobType, payload: JobPayload) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created = (counter * 1000) as i64;

        Self::new(id, created, job_type, payload)
    }

    /// True when `resolved == depends` (as sets)
    pub fn all_resolved(&self) -> bool {
        self.depends.iter().all(|d| self.resolved.contains(d))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &JobId> {
        self.depends.iter().filter(|d| !self.resolved.contains(d))
    }

    /// `ready` when nothing is left to wait on, else `waiting`
    pub fn eligible_status(&self) -> JobStatus {
        if self.all_resolved() {
            JobStatus::Ready
        } else {
            JobStatus::Waiting
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.repeats > 0
    }

    /// Record `antecedent` as resolved; ignores ids outside `depends`
    pub fn resolve(&mut self, antecedent: &str) {
        if self.depends.iter().any(|d| d == antecedent)
            && !self.resolved.iter().any(|r| r == antecedent)
        {
            self.resolved.push(antecedent.to_string());
        }
    }

    pub fn resolve_all(&mut self) {
        self.resolved = self.depends.clone();
    }
}
