// Queue Engine
//
// The public operation set. Every operation re-reads or guards on the
// committed record; no job status is cached in the engine.

use crate::application::config::QueueConfig;
use crate::application::constants::{
    MSG_CANCELLED, MSG_COMPLETED, MSG_PAUSED, MSG_READIED, MSG_RESTARTED, MSG_RESUMED,
    MSG_SUBMITTED,
};
use crate::application::dependency::{DependencyResolver, Direction};
use crate::application::lease::{LeaseManager, LeaseOutcome};
use crate::application::options::{
    CancelOptions, DoneOptions, DoneOutcome, FailOptions, GetJobOptions, GetWorkRequest,
    LogOptions, ProgressOptions, ReadyOptions, RemoveOptions, RerunOptions, RestartOptions,
    SaveOptions,
};
use crate::application::retry::{decide_repeat, next_occurrence_record, rerun_record, RepeatDecision};
use crate::application::state_machine::StateMachine;
use crate::domain::{
    next_occurrence, Job, JobId, JobSpec, JobStatus, LogEntry, LogLevel, Progress, RepeatWait,
    Transition,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobGuard, JobPatch, JobQuery, JobStore, Resolve, TimeProvider};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct QueueEngine {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    config: QueueConfig,
    state_machine: Arc<StateMachine>,
    resolver: DependencyResolver,
    lease: LeaseManager,
    /// Whether getWork hands out jobs (toggled by the job server)
    serving: AtomicBool,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: QueueConfig,
    ) -> Self {
        let state_machine = Arc::new(StateMachine::new(store.clone()));
        let resolver = DependencyResolver::new(
            store.clone(),
            state_machine.clone(),
            time_provider.clone(),
        );
        let lease = LeaseManager::new(
            store.clone(),
            state_machine.clone(),
            id_provider.clone(),
            time_provider.clone(),
        );

        Self {
            store,
            time_provider,
            id_provider,
            config,
            state_machine,
            resolver,
            lease,
            serving: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn lease_manager(&self) -> &LeaseManager {
        &self.lease
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }

    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    fn now(&self) -> i64 {
        self.time_provider.now_millis()
    }

    // ------------------------------------------------------------------
    // Creation and reads
    // ------------------------------------------------------------------

    /// Validate and insert a new job. Returns its id.
    pub async fn save(&self, spec: JobSpec, options: SaveOptions) -> Result<JobId> {
        validate_spec(&spec)?;

        let now = self.now();
        let id = match &spec.id {
            Some(id) => id.clone(),
            None => self.id_provider.generate_id(),
        };

        let resolved = self.resolver.check_new(&id, &spec.depends).await?;

        let first_occurrence = match &spec.repeat.wait {
            RepeatWait::Schedule(schedule) if spec.after.is_none() && spec.delay.is_none() => {
                Some(next_occurrence(now, schedule)?.ok_or_else(|| {
                    AppError::Validation("Repeat schedule has no future occurrence".to_string())
                })?)
            }
            _ => None,
        };

        if options.cancel_repeats {
            self.cancel_repeating(&spec).await?;
        }

        let mut job = Job::from_spec(spec, id.clone(), now, resolved);
        if let Some(after) = first_occurrence {
            job.after = after;
        }
        job.log
            .push(LogEntry::new(now, None, LogLevel::Info, MSG_SUBMITTED));

        self.store.insert(&job).await?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            priority = job.priority,
            depends = job.depends.len(),
            "Job saved"
        );
        Ok(id)
    }

    async fn cancel_repeating(&self, spec: &JobSpec) -> Result<()> {
        let repeating: Vec<JobId> = self
            .store
            .find(
                &JobQuery::new()
                    .job_types(vec![spec.job_type.clone()])
                    .statuses(&JobStatus::CANCELLABLE),
            )
            .await?
            .into_iter()
            .filter(|j| j.is_repeating() && Some(&j.id) != spec.id.as_ref())
            .map(|j| j.id)
            .collect();

        if !repeating.is_empty() {
            info!(job_type = %spec.job_type, count = repeating.len(), "Cancelling earlier repeats");
            self.cancel(&repeating, CancelOptions::default()).await?;
        }
        Ok(())
    }

    pub async fn get_job(&self, id: &str, options: GetJobOptions) -> Result<Option<Job>> {
        Ok(self
            .store
            .find_by_id(id)
            .await?
            .map(|job| strip_history(job, options)))
    }

    pub async fn get_jobs(&self, ids: &[JobId], options: GetJobOptions) -> Result<Vec<Job>> {
        let mut query = JobQuery::new().ids(ids.to_vec());
        if options.get_log || options.get_failures {
            query = query.with_history();
        }
        Ok(self
            .store
            .find(&query)
            .await?
            .into_iter()
            .map(|job| strip_history(job, options))
            .collect())
    }

    pub async fn find_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        self.store.find(query).await
    }

    pub async fn stats(&self) -> Result<Vec<(JobStatus, i64)>> {
        self.store.count_by_status().await
    }

    // ------------------------------------------------------------------
    // Worker operations
    // ------------------------------------------------------------------

    /// Claim ready work. With `wait`, polls until something is claimed or
    /// the bound elapses. Dropping the future between polls has no effect.
    pub async fn get_work(&self, request: &GetWorkRequest) -> Result<Vec<Job>> {
        let deadline = request.wait.map(|w| tokio::time::Instant::now() + w);
        let work_timeout = request.work_timeout.or(self.config.default_work_timeout);

        loop {
            if self.is_serving() {
                let claimed = self
                    .lease
                    .claim(&request.job_types, request.max_jobs, work_timeout)
                    .await?;
                if !claimed.is_empty() {
                    return Ok(claimed);
                }
            } else {
                debug!("Job server not running, no work handed out");
            }

            let now = tokio::time::Instant::now();
            match deadline {
                Some(deadline) if now < deadline => {
                    tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
                }
                _ => return Ok(Vec::new()),
            }
        }
    }

    pub async fn progress(
        &self,
        id: &str,
        run_id: &str,
        completed: f64,
        total: f64,
        options: ProgressOptions,
    ) -> Result<bool> {
        let progress = Progress::new(completed, total)?;
        self.lease
            .heartbeat(id, run_id, progress, options.work_timeout)
            .await
    }

    /// Append a worker log entry to the run `run_id`
    pub async fn log(
        &self,
        id: &str,
        run_id: &str,
        message: &str,
        options: LogOptions,
    ) -> Result<bool> {
        let mut entry = LogEntry::new(
            self.now(),
            Some(run_id.to_string()),
            options.level,
            message,
        );
        entry.data = options.data;

        let guard = JobGuard::new(id).run_id(Some(run_id.to_string()));
        self.state_machine
            .touch(guard, JobPatch::new().log(entry))
            .await
    }

    pub async fn done(
        &self,
        id: &str,
        run_id: &str,
        result: serde_json::Value,
        options: DoneOptions,
    ) -> Result<DoneOutcome> {
        let Some(job) = self.store.find_by_id(id).await? else {
            return Ok(DoneOutcome::default());
        };

        let now = self.now();
        let progress = Progress {
            completed: job.progress.total,
            total: job.progress.total,
            percent: 100.0,
        };
        let patch = JobPatch::new()
            .result(result)
            .progress(progress)
            .clear_lease()
            .log(LogEntry::new(
                now,
                Some(run_id.to_string()),
                LogLevel::Success,
                MSG_COMPLETED,
            ));
        let guard = JobGuard::new(id).run_id(Some(run_id.to_string()));

        if !self
            .state_machine
            .apply(Transition::Complete, guard, patch)
            .await?
        {
            warn!(job_id = %id, run_id = %run_id, "done ignored: lease not held");
            return Ok(DoneOutcome::default());
        }

        self.resolver.on_completed(id, options.delay_deps).await?;

        let repeat_id = match decide_repeat(&job, now)? {
            RepeatDecision::Repeat { after } => {
                let next_id = self.id_provider.generate_id();
                let next = next_occurrence_record(&job, next_id.clone(), now, after);
                self.store.insert(&next).await?;
                info!(
                    job_id = %id,
                    next_id = %next_id,
                    after,
                    repeats = next.repeats,
                    "Next occurrence scheduled"
                );
                Some(next_id)
            }
            RepeatDecision::Finished => None,
        };

        Ok(DoneOutcome {
            completed: true,
            repeat_id: repeat_id.filter(|_| options.repeat_id),
        })
    }

    pub async fn fail(
        &self,
        id: &str,
        run_id: &str,
        error: serde_json::Value,
        options: FailOptions,
    ) -> Result<bool> {
        let Some(job) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Running || job.run_id.as_deref() != Some(run_id) {
            warn!(job_id = %id, run_id = %run_id, "fail ignored: lease not held");
            return Ok(false);
        }

        let outcome = self
            .lease
            .release_failed(&job, &run_id.to_string(), error, options.fatal, None)
            .await?;

        if outcome == Some(LeaseOutcome::Failed) && options.dependents {
            let dependents = self
                .resolver
                .collect(&[job.id.clone()], Direction::Dependents, &JobStatus::CANCELLABLE)
                .await?;
            self.cancel_each(&dependents).await?;
        }
        Ok(outcome.is_some())
    }

    // ------------------------------------------------------------------
    // Management operations
    // ------------------------------------------------------------------

    pub async fn pause(&self, ids: &[JobId]) -> Result<bool> {
        let now = self.now();
        let mut any = false;
        for id in ids {
            let patch = JobPatch::new().log(LogEntry::new(now, None, LogLevel::Info, MSG_PAUSED));
            any |= self
                .state_machine
                .apply(Transition::Pause, JobGuard::new(id.clone()), patch)
                .await?;
        }
        Ok(any)
    }

    /// paused -> waiting, then promoted if nothing is left to wait on
    pub async fn resume(&self, ids: &[JobId]) -> Result<bool> {
        let now = self.now();
        let mut any = false;
        for id in ids {
            let patch = JobPatch::new().log(LogEntry::new(now, None, LogLevel::Info, MSG_RESUMED));
            if self
                .state_machine
                .apply(Transition::Resume, JobGuard::new(id.clone()), patch)
                .await?
            {
                self.resolver.promote(id, None).await?;
                any = true;
            }
        }
        Ok(any)
    }

    /// Make jobs eligible now (or at `time`). Without `force` only waiting
    /// jobs with every antecedent resolved move. With `force`, antecedents
    /// are marked resolved and a running job loses its lease.
    pub async fn ready(&self, ids: &[JobId], options: ReadyOptions) -> Result<bool> {
        let now = self.now();
        let after = options.time.unwrap_or(now);
        let mut any = false;

        for id in ids {
            let entry = LogEntry::new(now, None, LogLevel::Info, MSG_READIED);
            let (transition, guard, patch) = if options.force {
                (
                    Transition::ForceReady,
                    JobGuard::new(id.clone()),
                    JobPatch::new()
                        .clear_lease()
                        .resolve(Resolve::All)
                        .after(after)
                        .log(entry),
                )
            } else {
                (
                    Transition::Promote,
                    JobGuard::new(id.clone()).all_resolved(),
                    JobPatch::new().after(after).log(entry),
                )
            };
            any |= self.state_machine.apply(transition, guard, patch).await?;
        }
        Ok(any)
    }

    pub async fn cancel(&self, ids: &[JobId], options: CancelOptions) -> Result<bool> {
        let mut targets = ids.to_vec();
        if options.dependents {
            targets.extend(
                self.resolver
                    .collect(ids, Direction::Dependents, &JobStatus::CANCELLABLE)
                    .await?,
            );
        }
        if options.antecedents {
            targets.extend(
                self.resolver
                    .collect(ids, Direction::Antecedents, &JobStatus::CANCELLABLE)
                    .await?,
            );
        }
        self.cancel_each(&dedup(targets)).await
    }

    async fn cancel_each(&self, ids: &[JobId]) -> Result<bool> {
        let now = self.now();
        let mut any = false;
        for id in ids {
            let patch = JobPatch::new()
                .clear_lease()
                .log(LogEntry::new(now, None, LogLevel::Warning, MSG_CANCELLED));
            any |= self
                .state_machine
                .apply(Transition::Cancel, JobGuard::new(id.clone()), patch)
                .await?;
        }
        Ok(any)
    }

    /// Re-arm cancelled or failed jobs with a fresh retry budget
    pub async fn restart(&self, ids: &[JobId], options: RestartOptions) -> Result<bool> {
        if matches!(options.retries, Some(r) if r < 0) {
            return Err(AppError::Validation("retries must not be negative".to_string()));
        }

        let mut targets = ids.to_vec();
        if options.antecedents {
            targets.extend(
                self.resolver
                    .collect(ids, Direction::Antecedents, &JobStatus::RESTARTABLE)
                    .await?,
            );
        }
        if options.dependents {
            targets.extend(
                self.resolver
                    .collect(ids, Direction::Dependents, &JobStatus::RESTARTABLE)
                    .await?,
            );
        }

        let now = self.now();
        let mut any = false;
        for id in dedup(targets) {
            let Some(job) = self.store.find_by_id(&id).await? else {
                continue;
            };

            let mut patch = JobPatch::new()
                .retries(options.retries.unwrap_or(job.repeat_retries))
                .retried(0)
                .progress(Progress::default())
                .after(now)
                .log(LogEntry::new(now, None, LogLevel::Info, MSG_RESTARTED));
            if options.until.is_some() {
                patch = patch.retry_until(options.until);
            }

            if self
                .state_machine
                .apply(Transition::Restart, JobGuard::new(id.clone()), patch)
                .await?
            {
                self.resolver.promote(&id, None).await?;
                any = true;
            }
        }
        Ok(any)
    }

    pub async fn remove(&self, ids: &[JobId], options: RemoveOptions) -> Result<bool> {
        let statuses: &[JobStatus] = if options.force {
            &JobStatus::FORCE_REMOVABLE
        } else {
            &JobStatus::REMOVABLE
        };

        let mut any = false;
        for id in ids {
            if self.store.delete_where(id, statuses).await? {
                info!(job_id = %id, "Job removed");
                any = true;
            } else {
                warn!(job_id = %id, force = options.force, "Job not removable");
            }
        }
        Ok(any)
    }

    /// New occurrence of a completed job. `None` when the job is not completed.
    pub async fn rerun(&self, id: &str, options: RerunOptions) -> Result<Option<JobId>> {
        if options.repeats < 0 || options.wait < 0 {
            return Err(AppError::Validation(
                "repeats and wait must not be negative".to_string(),
            ));
        }
        let job = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", id)))?;

        if job.status != JobStatus::Completed {
            warn!(job_id = %id, status = %job.status, "rerun ignored: job not completed");
            return Ok(None);
        }

        let now = self.now();
        let next_id = self.id_provider.generate_id();
        let next = rerun_record(
            &job,
            next_id.clone(),
            now,
            options.repeats,
            options.until,
            options.wait,
        );
        self.store.insert(&next).await?;

        info!(job_id = %id, next_id = %next_id, "Job rerun");
        Ok(Some(next_id))
    }
}

fn validate_spec(spec: &JobSpec) -> Result<()> {
    if spec.job_type.as_str().trim().is_empty() {
        return Err(AppError::Validation("job type must not be empty".to_string()));
    }
    if matches!(&spec.id, Some(id) if id.trim().is_empty()) {
        return Err(AppError::Validation("job id must not be empty".to_string()));
    }
    if spec.retry.retries < 0 || spec.retry.wait < 0 {
        return Err(AppError::Validation(
            "retries and retry wait must not be negative".to_string(),
        ));
    }
    if spec.repeat.repeats < 0 {
        return Err(AppError::Validation("repeats must not be negative".to_string()));
    }
    match &spec.repeat.wait {
        RepeatWait::Delay(wait) if *wait < 0 => {
            return Err(AppError::Validation(
                "repeat wait must not be negative".to_string(),
            ))
        }
        RepeatWait::Schedule(schedule) => schedule.validate()?,
        RepeatWait::Delay(_) => {}
    }

    let mut seen = HashSet::new();
    if let Some(duplicate) = spec.depends.iter().find(|d| !seen.insert(*d)) {
        return Err(AppError::Validation(format!(
            "duplicate dependency: {}",
            duplicate
        )));
    }
    Ok(())
}

fn strip_history(mut job: Job, options: GetJobOptions) -> Job {
    if !options.get_log {
        job.log.clear();
    }
    if !options.get_failures {
        job.failures.clear();
    }
    job
}

fn dedup(ids: Vec<JobId>) -> Vec<JobId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
