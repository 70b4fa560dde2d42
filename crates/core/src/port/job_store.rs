// Job Store Port (Interface)
//
// The document store owns atomicity. Every status change is expressed as a
// guarded single-document update: the guard is evaluated against the
// committed record and the patch is applied only if it holds.

use crate::domain::{
    FailureRecord, Job, JobId, JobStatus, JobType, LogEntry, Progress, RunId, Transition,
};
use crate::error::Result;
use async_trait::async_trait;

/// Predicate a committed record must satisfy for an update to apply
#[derive(Debug, Clone, PartialEq)]
pub struct JobGuard {
    pub id: JobId,
    /// Allowed current statuses (empty = any)
    pub statuses: Vec<JobStatus>,
    /// Required current run id (`Some(None)` = no active lease)
    pub run_id: Option<Option<RunId>>,
    /// Lease must have expired strictly before this instant
    pub expired_before: Option<i64>,
    /// Every antecedent must already be resolved
    pub all_resolved: bool,
}

impl JobGuard {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            statuses: Vec::new(),
            run_id: None,
            expired_before: None,
            all_resolved: false,
        }
    }

    /// Guard on the source statuses of a transition
    pub fn transition(id: impl Into<JobId>, transition: Transition) -> Self {
        Self::new(id).statuses(transition.sources())
    }

    pub fn statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn run_id(mut self, run_id: Option<RunId>) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn expired_before(mut self, instant: i64) -> Self {
        self.expired_before = Some(instant);
        self
    }

    pub fn all_resolved(mut self) -> Self {
        self.all_resolved = true;
        self
    }

    /// Evaluate against a record (used by in-process stores)
    pub fn matches(&self, job: &Job) -> bool {
        if job.id != self.id {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
            return false;
        }
        if let Some(run_id) = &self.run_id {
            if &job.run_id != run_id {
                return false;
            }
        }
        if let Some(instant) = self.expired_before {
            match job.expires_after {
                Some(expires) if expires < instant => {}
                _ => return false,
            }
        }
        if self.all_resolved && !job.all_resolved() {
            return false;
        }
        true
    }
}

/// Antecedent resolution carried by a patch
#[derive(Debug, Clone, PartialEq)]
pub enum Resolve {
    One(JobId),
    All,
}

/// Field assignments and history appends applied by a guarded update.
/// `updated` is always stamped by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub run_id: Option<Option<RunId>>,
    pub after: Option<i64>,
    pub work_timeout: Option<Option<i64>>,
    pub expires_after: Option<Option<i64>>,
    pub progress: Option<Progress>,
    pub result: Option<serde_json::Value>,
    pub retries: Option<i64>,
    pub retried: Option<i64>,
    pub retry_until: Option<Option<i64>>,
    pub resolve: Option<Resolve>,
    pub log: Option<LogEntry>,
    pub failure: Option<FailureRecord>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Clear the lease (run id and expiry)
    pub fn clear_lease(mut self) -> Self {
        self.run_id = Some(None);
        self.expires_after = Some(None);
        self
    }

    pub fn after(mut self, after: i64) -> Self {
        self.after = Some(after);
        self
    }

    pub fn expires_after(mut self, expires_after: Option<i64>) -> Self {
        self.expires_after = Some(expires_after);
        self
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn retries(mut self, retries: i64) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retried(mut self, retried: i64) -> Self {
        self.retried = Some(retried);
        self
    }

    pub fn retry_until(mut self, retry_until: Option<i64>) -> Self {
        self.retry_until = Some(retry_until);
        self
    }

    pub fn resolve(mut self, resolve: Resolve) -> Self {
        self.resolve = Some(resolve);
        self
    }

    pub fn log(mut self, entry: LogEntry) -> Self {
        self.log = Some(entry);
        self
    }

    pub fn failure(mut self, failure: FailureRecord) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Apply to a record (used by in-process stores)
    pub fn apply(&self, job: &mut Job, now: i64) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(run_id) = &self.run_id {
            job.run_id = run_id.clone();
        }
        if let Some(after) = self.after {
            job.after = after;
        }
        if let Some(work_timeout) = self.work_timeout {
            job.work_timeout = work_timeout;
        }
        if let Some(expires_after) = self.expires_after {
            job.expires_after = expires_after;
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(result) = &self.result {
            job.result = Some(result.clone());
        }
        if let Some(retries) = self.retries {
            job.retries = retries;
        }
        if let Some(retried) = self.retried {
            job.retried = retried;
        }
        if let Some(retry_until) = self.retry_until {
            job.retry_until = retry_until;
        }
        match &self.resolve {
            Some(Resolve::One(antecedent)) => job.resolve(antecedent),
            Some(Resolve::All) => job.resolve_all(),
            None => {}
        }
        if let Some(entry) = &self.log {
            job.log.push(entry.clone());
        }
        if let Some(failure) = &self.failure {
            job.failures.push(failure.clone());
        }
        job.updated = now;
    }
}

/// Read filter. Results are ordered by priority, then `after`, then creation.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub ids: Option<Vec<JobId>>,
    pub statuses: Vec<JobStatus>,
    pub job_types: Vec<JobType>,
    /// Only jobs listing this id in `depends`
    pub depends_on: Option<JobId>,
    /// Only jobs whose lease expired strictly before this instant
    pub expired_before: Option<i64>,
    pub limit: Option<usize>,
    /// Rows skipped after ordering
    pub offset: usize,
    /// Load `log` and `failures`
    pub with_history: bool,
}

impl JobQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: Vec<JobId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn job_types(mut self, job_types: Vec<JobType>) -> Self {
        self.job_types = job_types;
        self
    }

    pub fn depends_on(mut self, id: impl Into<JobId>) -> Self {
        self.depends_on = Some(id.into());
        self
    }

    pub fn expired_before(mut self, instant: i64) -> Self {
        self.expired_before = Some(instant);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_history(mut self) -> Self {
        self.with_history = true;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&job.id) {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
            return false;
        }
        if !self.job_types.is_empty() && !self.job_types.contains(&job.job_type) {
            return false;
        }
        if let Some(antecedent) = &self.depends_on {
            if !job.depends.contains(antecedent) {
                return false;
            }
        }
        if let Some(instant) = self.expired_before {
            match job.expires_after {
                Some(expires) if expires < instant => {}
                _ => return false,
            }
        }
        true
    }
}

/// Atomic batch claim of ready work
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub job_types: Vec<JobType>,
    pub now: i64,
    /// One fresh run id per claimable slot; its length bounds the batch
    pub run_ids: Vec<RunId>,
    pub work_timeout: Option<i64>,
    /// Appended to each claimed job with its new run id filled in
    pub log: Option<LogEntry>,
}

/// Document store interface for Job Records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job; fails if the id already exists
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID (with full history)
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Find jobs matching a filter
    async fn find(&self, query: &JobQuery) -> Result<Vec<Job>>;

    /// Atomic conditional update; false when the guard matched nothing
    async fn update_where(&self, guard: &JobGuard, patch: &JobPatch) -> Result<bool>;

    /// Select ready jobs of the given types with `after <= now`, ordered by
    /// priority then `after`, and move them to running in one atomic step
    async fn claim_ready(&self, request: &ClaimRequest) -> Result<Vec<Job>>;

    /// Delete a job if its current status is one of `statuses`
    async fn delete_where(&self, id: &str, statuses: &[JobStatus]) -> Result<bool>;

    /// Count jobs per status
    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>>;
}

/// Claim ordering shared by in-process stores
pub fn claim_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then(a.after.cmp(&b.after))
        .then(a.created.cmp(&b.created))
        .then(a.id.cmp(&b.id))
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory store; a single mutex makes every operation atomic
    pub struct InMemoryJobStore {
        jobs: Mutex<HashMap<JobId, Job>>,
        time_provider: Arc<dyn TimeProvider>,
    }

    impl InMemoryJobStore {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(HashMap::new()),
                time_provider,
            }
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<JobId, Job>>> {
            self.jobs
                .lock()
                .map_err(|_| AppError::Database("in-memory store poisoned".to_string()))
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.lock()?;
            if jobs.contains_key(&job.id) {
                return Err(AppError::Validation(format!("Job {} already exists", job.id)));
            }
            let mut stored = job.clone();
            stored.updated = self.time_provider.now_millis();
            jobs.insert(job.id.clone(), stored);
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.lock()?.get(id).cloned())
        }

        async fn find(&self, query: &JobQuery) -> Result<Vec<Job>> {
            let jobs = self.lock()?;
            let mut found: Vec<Job> = jobs.values().filter(|j| query.matches(j)).cloned().collect();
            found.sort_by(claim_order);
            found.drain(..query.offset.min(found.len()));
            if let Some(limit) = query.limit {
                found.truncate(limit);
            }
            if !query.with_history {
                for job in &mut found {
                    job.log.clear();
                    job.failures.clear();
                }
            }
            Ok(found)
        }

        async fn update_where(&self, guard: &JobGuard, patch: &JobPatch) -> Result<bool> {
            let mut jobs = self.lock()?;
            match jobs.get_mut(&guard.id) {
                Some(job) if guard.matches(job) => {
                    patch.apply(job, self.time_provider.now_millis());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn claim_ready(&self, request: &ClaimRequest) -> Result<Vec<Job>> {
            let mut jobs = self.lock()?;
            let mut candidates: Vec<&Job> = jobs
                .values()
                .filter(|j| {
                    j.status == JobStatus::Ready
                        && j.after <= request.now
                        && request.job_types.contains(&j.job_type)
                })
                .collect();
            candidates.sort_by(|a, b| claim_order(a, b));
            let ids: Vec<JobId> = candidates
                .into_iter()
                .take(request.run_ids.len())
                .map(|j| j.id.clone())
                .collect();

            let now = self.time_provider.now_millis();
            let mut claimed = Vec::with_capacity(ids.len());
            for (id, run_id) in ids.iter().zip(&request.run_ids) {
                if let Some(job) = jobs.get_mut(id) {
                    job.status = JobStatus::Running;
                    job.run_id = Some(run_id.clone());
                    job.work_timeout = request.work_timeout;
                    job.expires_after = request.work_timeout.map(|t| request.now + t);
                    if let Some(entry) = &request.log {
                        let mut entry = entry.clone();
                        entry.run_id = Some(run_id.clone());
                        job.log.push(entry);
                    }
                    job.updated = now;
                    claimed.push(job.clone());
                }
            }
            Ok(claimed)
        }

        async fn delete_where(&self, id: &str, statuses: &[JobStatus]) -> Result<bool> {
            let mut jobs = self.lock()?;
            match jobs.get(id) {
                Some(job) if statuses.contains(&job.status) => {
                    jobs.remove(id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
            let jobs = self.lock()?;
            Ok(JobStatus::ALL
                .iter()
                .map(|status| {
                    let count = jobs.values().filter(|j| j.status == *status).count() as i64;
                    (*status, count)
                })
                .collect())
        }
    }
}
