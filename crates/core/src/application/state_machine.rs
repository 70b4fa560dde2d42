// State Machine
//
// Executes a status transition as one guarded update. The guard's status set
// is always narrowed to the transition's legal sources, so no caller can
// write a status the table does not allow.

use crate::domain::{JobStatus, Transition};
use crate::error::Result;
use crate::port::{JobGuard, JobPatch, JobStore};
use std::sync::Arc;
use tracing::{debug, info};

pub struct StateMachine {
    store: Arc<dyn JobStore>,
}

impl StateMachine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Apply `transition` if the committed record still satisfies `guard`.
    ///
    /// Returns false when the guarded update matched nothing (the job is gone,
    /// or another caller moved it first).
    pub async fn apply(
        &self,
        transition: Transition,
        guard: JobGuard,
        patch: JobPatch,
    ) -> Result<bool> {
        let Some(guard) = restrict(guard, transition) else {
            debug!(transition = ?transition, "Guard excludes every legal source");
            return Ok(false);
        };
        let patch = JobPatch {
            status: Some(transition.target()),
            ..patch
        };

        let applied = self.store.update_where(&guard, &patch).await?;

        if applied {
            info!(
                job_id = %guard.id,
                transition = ?transition,
                status = %transition.target(),
                "Transition committed"
            );
        } else {
            debug!(
                job_id = %guard.id,
                transition = ?transition,
                "Transition did not apply"
            );
        }
        Ok(applied)
    }

    /// Guarded update that leaves status untouched (heartbeats, log appends)
    pub async fn touch(&self, guard: JobGuard, patch: JobPatch) -> Result<bool> {
        let patch = JobPatch {
            status: None,
            ..patch
        };
        self.store.update_where(&guard, &patch).await
    }
}

/// Narrow the guard to the transition's sources. `None` when nothing is left,
/// since an empty status set would match any status.
fn restrict(mut guard: JobGuard, transition: Transition) -> Option<JobGuard> {
    let sources = transition.sources();
    guard.statuses = if guard.statuses.is_empty() {
        sources.to_vec()
    } else {
        guard
            .statuses
            .into_iter()
            .filter(|s| sources.contains(s))
            .collect::<Vec<JobStatus>>()
    };
    (!guard.statuses.is_empty()).then_some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobPayload, JobType};
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::MockTimeProvider;

    async fn setup(status: JobStatus) -> (StateMachine, Arc<InMemoryJobStore>) {
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let store = Arc::new(InMemoryJobStore::new(clock));
        let mut job = Job::new("j1", 0, JobType::new("t"), JobPayload::default());
        job.status = status;
        store.insert(&job).await.unwrap();
        (StateMachine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_apply_moves_status() {
        let (sm, store) = setup(JobStatus::Ready).await;
        let applied = sm
            .apply(Transition::Pause, JobGuard::new("j1"), JobPatch::new())
            .await
            .unwrap();
        assert!(applied);
        let job = store.find_by_id("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.updated, 1_000);
    }

    #[tokio::test]
    async fn test_illegal_source_is_a_noop() {
        let (sm, store) = setup(JobStatus::Completed).await;
        let applied = sm
            .apply(Transition::Cancel, JobGuard::new("j1"), JobPatch::new())
            .await
            .unwrap();
        assert!(!applied);
        let job = store.find_by_id("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_guard_statuses_are_narrowed_to_sources() {
        let (sm, _store) = setup(JobStatus::Completed).await;
        // Caller asks for completed too, but Cancel never starts from it
        let guard = JobGuard::new("j1").statuses(&[JobStatus::Completed, JobStatus::Ready]);
        assert!(!sm.apply(Transition::Cancel, guard, JobPatch::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_guard_outside_sources_never_applies() {
        let (sm, store) = setup(JobStatus::Completed).await;
        let guard = JobGuard::new("j1").statuses(&[JobStatus::Completed]);
        assert!(!sm.apply(Transition::Cancel, guard, JobPatch::new()).await.unwrap());
        let job = store.find_by_id("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_patch_cannot_override_target() {
        let (sm, store) = setup(JobStatus::Ready).await;
        let patch = JobPatch::new().status(JobStatus::Completed);
        sm.apply(Transition::Pause, JobGuard::new("j1"), patch)
            .await
            .unwrap();
        let job = store.find_by_id("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_touch_keeps_status() {
        let (sm, store) = setup(JobStatus::Running).await;
        let patch = JobPatch::new().status(JobStatus::Failed).after(5);
        assert!(sm.touch(JobGuard::new("j1"), patch).await.unwrap());
        let job = store.find_by_id("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.after, 5);
    }
}
