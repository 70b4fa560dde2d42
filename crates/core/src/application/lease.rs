// Lease Manager
//
// Hands out work, records heartbeats, and repossesses leases that expire
// without one. Repossession goes through the same retry decision as an
// explicit fail, guarded on the stale run id and expiry so a heartbeat that
// lands first wins.

use crate::application::constants::{
    LEASE_EXPIRED_REASON, MSG_FAILED, MSG_LEASE_EXPIRED, MSG_RETRY, MSG_RUNNING,
};
use crate::application::retry::{decide_retry, RetryDecision};
use crate::application::state_machine::StateMachine;
use crate::domain::{
    FailureRecord, Job, JobStatus, JobType, LogEntry, LogLevel, Progress, RunId, Transition,
};
use crate::error::{AppError, Result};
use crate::port::{ClaimRequest, IdProvider, JobGuard, JobPatch, JobQuery, JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{error, info, warn};

/// How a lease ended when a failure was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Re-armed as ready
    Retried,
    /// Permanently failed
    Failed,
}

impl LeaseOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            LeaseOutcome::Retried => JobStatus::Ready,
            LeaseOutcome::Failed => JobStatus::Failed,
        }
    }
}

pub struct LeaseManager {
    store: Arc<dyn JobStore>,
    state_machine: Arc<StateMachine>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        state_machine: Arc<StateMachine>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            state_machine,
            id_provider,
            time_provider,
        }
    }

    /// Claim up to `max_jobs` ready jobs of the given types in one atomic step
    pub async fn claim(
        &self,
        job_types: &[JobType],
        max_jobs: usize,
        work_timeout: Option<i64>,
    ) -> Result<Vec<Job>> {
        if job_types.is_empty() {
            return Err(AppError::Validation(
                "getWork needs at least one job type".to_string(),
            ));
        }
        if max_jobs == 0 {
            return Err(AppError::Validation("maxJobs must be at least 1".to_string()));
        }
        if matches!(work_timeout, Some(t) if t <= 0) {
            return Err(AppError::Validation(
                "workTimeout must be positive".to_string(),
            ));
        }

        let now = self.time_provider.now_millis();
        let request = ClaimRequest {
            job_types: job_types.to_vec(),
            now,
            run_ids: (0..max_jobs).map(|_| self.id_provider.generate_id()).collect(),
            work_timeout,
            log: Some(LogEntry::new(now, None, LogLevel::Info, MSG_RUNNING)),
        };

        let claimed = self.store.claim_ready(&request).await?;
        for job in &claimed {
            info!(
                job_id = %job.id,
                run_id = ?job.run_id,
                job_type = %job.job_type,
                priority = job.priority,
                "Job claimed"
            );
        }
        Ok(claimed)
    }

    /// Progress heartbeat. A `work_timeout` re-stamps the lease expiry.
    pub async fn heartbeat(
        &self,
        id: &str,
        run_id: &str,
        progress: Progress,
        work_timeout: Option<i64>,
    ) -> Result<bool> {
        let mut patch = JobPatch::new().progress(progress);
        if let Some(timeout) = work_timeout {
            if timeout <= 0 {
                return Err(AppError::Validation(
                    "workTimeout must be positive".to_string(),
                ));
            }
            let now = self.time_provider.now_millis();
            patch = patch.expires_after(Some(now.saturating_add(timeout)));
        }

        let guard = JobGuard::new(id)
            .statuses(&[JobStatus::Running])
            .run_id(Some(run_id.to_string()));
        let applied = self.state_machine.touch(guard, patch).await?;
        if !applied {
            warn!(job_id = %id, run_id = %run_id, "Progress for a lease that is not held");
        }
        Ok(applied)
    }

    /// End the current run of `job` with a failure. Retries while budget
    /// remains, otherwise fails permanently. `expired_before` additionally
    /// requires the lease to have lapsed.
    pub async fn release_failed(
        &self,
        job: &Job,
        run_id: &RunId,
        error: serde_json::Value,
        fatal: bool,
        expired_before: Option<i64>,
    ) -> Result<Option<LeaseOutcome>> {
        let now = self.time_provider.now_millis();
        let mut guard = JobGuard::new(job.id.clone()).run_id(Some(run_id.clone()));
        if let Some(instant) = expired_before {
            guard = guard.expired_before(instant);
        }

        let failure = FailureRecord {
            time: now,
            run_id: Some(run_id.clone()),
            error,
        };
        let patch = JobPatch::new().clear_lease().failure(failure);

        let (transition, patch, outcome) = match decide_retry(job, now, fatal) {
            RetryDecision::Retry { after, retried } => (
                Transition::Retry,
                patch
                    .after(after)
                    .retried(retried)
                    .log(LogEntry::new(now, Some(run_id.clone()), LogLevel::Warning, MSG_RETRY)),
                LeaseOutcome::Retried,
            ),
            RetryDecision::Failed => (
                Transition::Fail,
                patch.log(LogEntry::new(
                    now,
                    Some(run_id.clone()),
                    LogLevel::Danger,
                    MSG_FAILED,
                )),
                LeaseOutcome::Failed,
            ),
        };

        let applied = self.state_machine.apply(transition, guard, patch).await?;
        Ok(applied.then_some(outcome))
    }

    /// Repossess every running job whose lease expired before now
    pub async fn sweep(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let expired = self
            .store
            .find(
                &JobQuery::new()
                    .statuses(&[JobStatus::Running])
                    .expired_before(now),
            )
            .await?;

        let mut repossessed = 0;
        for job in expired {
            let Some(run_id) = job.run_id.clone() else {
                continue;
            };
            let reason = serde_json::json!({ "reason": LEASE_EXPIRED_REASON });

            match self
                .release_failed(&job, &run_id, reason, false, Some(now))
                .await
            {
                Ok(Some(outcome)) => {
                    warn!(
                        job_id = %job.id,
                        run_id = %run_id,
                        status = %outcome.status(),
                        "{}",
                        MSG_LEASE_EXPIRED
                    );
                    repossessed += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(job_id = %job.id, error = ?e, "Lease repossession failed");
                }
            }
        }

        if repossessed > 0 {
            info!(repossessed, "Lease sweep complete");
        }
        Ok(repossessed)
    }

    /// Fail every running job with `reason` (job server shutdown)
    pub async fn fail_all_running(&self, reason: &str) -> Result<usize> {
        let running = self
            .store
            .find(&JobQuery::new().statuses(&[JobStatus::Running]))
            .await?;

        let mut failed = 0;
        for job in running {
            let Some(run_id) = job.run_id.clone() else {
                continue;
            };
            let error = serde_json::json!({ "reason": reason });
            match self.release_failed(&job, &run_id, error, false, None).await {
                Ok(Some(_)) => failed += 1,
                Ok(None) => {}
                Err(e) => error!(job_id = %job.id, error = ?e, "Failed to release running job"),
            }
        }
        Ok(failed)
    }
}
