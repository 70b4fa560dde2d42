// Dependency Resolver
//
// Antecedent/dependent bookkeeping over the store. Dependents are found by
// querying `depends`; nothing is kept in memory between calls. Every step is
// a single-document guarded update, so a partially applied cascade can be
// finished later by `reconcile`.

use crate::application::constants::{MAX_DEPENDENCY_SCAN, RECONCILE_BATCH};
use crate::application::state_machine::StateMachine;
use crate::domain::{DependencyGraph, JobId, JobStatus, Transition};
use crate::error::{AppError, Result};
use crate::port::{JobGuard, JobPatch, JobQuery, JobStore, Resolve, TimeProvider};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Direction of a cascade walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards jobs listed in `depends`
    Antecedents,
    /// Towards jobs listing the current one in `depends`
    Dependents,
}

pub struct DependencyResolver {
    store: Arc<dyn JobStore>,
    state_machine: Arc<StateMachine>,
    time_provider: Arc<dyn TimeProvider>,
    /// Where the next reconcile batch starts among waiting jobs
    reconcile_offset: AtomicUsize,
}

impl DependencyResolver {
    pub fn new(
        store: Arc<dyn JobStore>,
        state_machine: Arc<StateMachine>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            state_machine,
            time_provider,
            reconcile_offset: AtomicUsize::new(0),
        }
    }

    /// Validate the edges of a job about to be created.
    ///
    /// Loads the transitive antecedents (bounded), rejects the job when it
    /// would reach itself, and returns the antecedents already completed.
    /// Unknown ids are allowed; they may be saved later under that id.
    pub async fn check_new(&self, id: &str, depends: &[JobId]) -> Result<Vec<JobId>> {
        let mut graph = DependencyGraph::new();
        graph.add_job(id, depends);

        let mut completed = Vec::new();
        let mut seen: HashSet<JobId> = HashSet::new();
        seen.insert(id.to_string());
        let mut frontier: Vec<JobId> = depends
            .iter()
            .filter(|d| seen.insert((*d).clone()))
            .cloned()
            .collect();

        while !frontier.is_empty() {
            if seen.len() > MAX_DEPENDENCY_SCAN {
                return Err(AppError::Validation(format!(
                    "Dependency graph of {} exceeds {} jobs",
                    id, MAX_DEPENDENCY_SCAN
                )));
            }

            let found = self
                .store
                .find(&JobQuery::new().ids(std::mem::take(&mut frontier)))
                .await?;

            for job in found {
                if job.status == JobStatus::Completed && depends.contains(&job.id) {
                    completed.push(job.id.clone());
                }
                graph.add_job(&job.id, &job.depends);
                for antecedent in &job.depends {
                    if seen.insert(antecedent.clone()) {
                        frontier.push(antecedent.clone());
                    }
                }
            }
        }

        graph.ensure_acyclic(id)?;
        Ok(completed)
    }

    /// Record the completion of `antecedent` on every dependent and promote
    /// those that became fully resolved. Returns the number promoted.
    pub async fn on_completed(&self, antecedent: &str, delay_deps: Option<i64>) -> Result<usize> {
        let dependents = self
            .store
            .find(&JobQuery::new().depends_on(antecedent))
            .await?;

        let now = self.time_provider.now_millis();
        let after = delay_deps.map(|delay| now.saturating_add(delay.max(0)));
        let mut promoted = 0;

        for dependent in dependents {
            let patch = JobPatch::new().resolve(Resolve::One(antecedent.to_string()));
            self.state_machine
                .touch(JobGuard::new(dependent.id.clone()), patch)
                .await?;

            if self.promote(&dependent.id, after).await? {
                promoted += 1;
            }
        }

        if promoted > 0 {
            info!(antecedent = %antecedent, promoted, "Dependents promoted");
        }
        Ok(promoted)
    }

    /// waiting -> ready, only if every antecedent is resolved
    pub async fn promote(&self, id: &str, after: Option<i64>) -> Result<bool> {
        let mut patch = JobPatch::new();
        if let Some(after) = after {
            patch = patch.after(after);
        }
        self.state_machine
            .apply(
                Transition::Promote,
                JobGuard::transition(id, Transition::Promote).all_resolved(),
                patch,
            )
            .await
    }

    /// Breadth-first walk from `roots`, collecting related ids whose status is
    /// in `statuses`. Roots are excluded from the result.
    pub async fn collect(
        &self,
        roots: &[JobId],
        direction: Direction,
        statuses: &[JobStatus],
    ) -> Result<Vec<JobId>> {
        let mut visited: HashSet<JobId> = roots.iter().cloned().collect();
        let mut queue: VecDeque<JobId> = roots.iter().cloned().collect();
        let mut related = Vec::new();

        while let Some(current) = queue.pop_front() {
            if visited.len() > MAX_DEPENDENCY_SCAN {
                warn!(root = ?roots, "Cascade truncated at scan limit");
                break;
            }

            let next: Vec<JobId> = match direction {
                Direction::Dependents => self
                    .store
                    .find(&JobQuery::new().depends_on(current).statuses(statuses))
                    .await?
                    .into_iter()
                    .map(|j| j.id)
                    .collect(),
                Direction::Antecedents => {
                    let Some(job) = self.store.find_by_id(&current).await? else {
                        continue;
                    };
                    if job.depends.is_empty() {
                        continue;
                    }
                    self.store
                        .find(&JobQuery::new().ids(job.depends).statuses(statuses))
                        .await?
                        .into_iter()
                        .map(|j| j.id)
                        .collect()
                }
            };

            for id in next {
                if visited.insert(id.clone()) {
                    related.push(id.clone());
                    queue.push_back(id);
                }
            }
        }

        Ok(related)
    }

    /// Re-derive `resolved` for waiting jobs and promote any that are fully
    /// resolved. Repairs cascades interrupted between two documents.
    ///
    /// Each call handles one batch and the next call continues after it,
    /// wrapping to the start once the waiting set is exhausted.
    pub async fn reconcile(&self) -> Result<usize> {
        let offset = self.reconcile_offset.load(Ordering::SeqCst);
        let waiting = self
            .store
            .find(
                &JobQuery::new()
                    .statuses(&[JobStatus::Waiting])
                    .limit(RECONCILE_BATCH)
                    .offset(offset),
            )
            .await?;
        let scanned = waiting.len();

        let mut promoted = 0;
        for job in waiting {
            let unresolved: Vec<JobId> = job.unresolved().cloned().collect();
            if !unresolved.is_empty() {
                let done = self
                    .store
                    .find(
                        &JobQuery::new()
                            .ids(unresolved)
                            .statuses(&[JobStatus::Completed]),
                    )
                    .await?;
                for antecedent in done {
                    self.state_machine
                        .touch(
                            JobGuard::new(job.id.clone()),
                            JobPatch::new().resolve(Resolve::One(antecedent.id)),
                        )
                        .await?;
                }
            }
            if self.promote(&job.id, None).await? {
                promoted += 1;
            }
        }

        // Promoted jobs left the waiting set, so the rest shifted down by that many
        let next = if scanned < RECONCILE_BATCH {
            0
        } else {
            offset + scanned - promoted
        };
        self.reconcile_offset.store(next, Ordering::SeqCst);

        if promoted > 0 {
            info!(promoted, "Reconciled waiting jobs");
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobPayload, JobType};
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::MockTimeProvider;

    struct Fixture {
        resolver: DependencyResolver,
        store: Arc<InMemoryJobStore>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let store = Arc::new(InMemoryJobStore::new(clock.clone()));
        let sm = Arc::new(StateMachine::new(store.clone()));
        Fixture {
            resolver: DependencyResolver::new(store.clone(), sm, clock),
            store,
        }
    }

    async fn put(store: &InMemoryJobStore, id: &str, depends: &[&str], status: JobStatus) {
        let mut job = Job::new(id, 0, JobType::new("t"), JobPayload::default());
        job.depends = depends.iter().map(|s| s.to_string()).collect();
        job.status = status;
        store.insert(&job).await.unwrap();
    }

    fn ids(v: &[&str]) -> Vec<JobId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_check_new_rejects_cycle_through_store() {
        let f = fixture();
        // y already depends on x (forward reference); x now depends on y
        put(&f.store, "y", &["x"], JobStatus::Waiting).await;
        let err = f.resolver.check_new("x", &ids(&["y"])).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_check_new_rejects_self_dependency() {
        let f = fixture();
        assert!(f.resolver.check_new("x", &ids(&["x"])).await.is_err());
    }

    #[tokio::test]
    async fn test_check_new_reports_completed_antecedents() {
        let f = fixture();
        put(&f.store, "a", &[], JobStatus::Completed).await;
        put(&f.store, "b", &[], JobStatus::Ready).await;
        let resolved = f.resolver.check_new("c", &ids(&["a", "b"])).await.unwrap();
        assert_eq!(resolved, ids(&["a"]));
    }

    #[tokio::test]
    async fn test_on_completed_promotes_only_when_all_resolved() {
        let f = fixture();
        put(&f.store, "c", &["a", "b"], JobStatus::Waiting).await;

        assert_eq!(f.resolver.on_completed("a", None).await.unwrap(), 0);
        let c = f.store.find_by_id("c").await.unwrap().unwrap();
        assert_eq!(c.status, JobStatus::Waiting);
        assert_eq!(c.resolved, ids(&["a"]));

        assert_eq!(f.resolver.on_completed("b", Some(500)).await.unwrap(), 1);
        let c = f.store.find_by_id("c").await.unwrap().unwrap();
        assert_eq!(c.status, JobStatus::Ready);
        assert_eq!(c.after, 1_500);
    }

    #[tokio::test]
    async fn test_paused_dependent_is_resolved_but_not_promoted() {
        let f = fixture();
        put(&f.store, "c", &["a"], JobStatus::Paused).await;
        f.resolver.on_completed("a", None).await.unwrap();
        let c = f.store.find_by_id("c").await.unwrap().unwrap();
        assert_eq!(c.status, JobStatus::Paused);
        assert!(c.all_resolved());
    }

    #[tokio::test]
    async fn test_collect_dependents_transitively() {
        let f = fixture();
        put(&f.store, "a", &[], JobStatus::Running).await;
        put(&f.store, "b", &["a"], JobStatus::Waiting).await;
        put(&f.store, "c", &["b"], JobStatus::Waiting).await;
        put(&f.store, "d", &["b"], JobStatus::Completed).await;

        let mut found = f
            .resolver
            .collect(&ids(&["a"]), Direction::Dependents, &JobStatus::CANCELLABLE)
            .await
            .unwrap();
        found.sort();
        assert_eq!(found, ids(&["b", "c"]));
    }

    #[tokio::test]
    async fn test_collect_antecedents() {
        let f = fixture();
        put(&f.store, "a", &[], JobStatus::Failed).await;
        put(&f.store, "b", &["a"], JobStatus::Cancelled).await;
        put(&f.store, "c", &["b"], JobStatus::Cancelled).await;

        let found = f
            .resolver
            .collect(&ids(&["c"]), Direction::Antecedents, &JobStatus::RESTARTABLE)
            .await
            .unwrap();
        assert_eq!(found, ids(&["b", "a"]));
    }

    #[tokio::test]
    async fn test_reconcile_repairs_missed_resolution() {
        let f = fixture();
        put(&f.store, "a", &[], JobStatus::Completed).await;
        put(&f.store, "b", &["a"], JobStatus::Waiting).await;

        assert_eq!(f.resolver.reconcile().await.unwrap(), 1);
        let b = f.store.find_by_id("b").await.unwrap().unwrap();
        assert_eq!(b.status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn test_reconcile_pages_past_jobs_that_stay_waiting() {
        let f = fixture();
        put(&f.store, "a", &[], JobStatus::Completed).await;
        for n in 0..RECONCILE_BATCH {
            let mut blocked = Job::new(
                format!("blocked-{:03}", n),
                0,
                JobType::new("t"),
                JobPayload::default(),
            );
            blocked.priority = -20;
            blocked.depends = ids(&["never-saved"]);
            blocked.status = JobStatus::Waiting;
            f.store.insert(&blocked).await.unwrap();
        }
        let mut late = Job::new("late", 0, JobType::new("t"), JobPayload::default());
        late.priority = 10;
        late.depends = ids(&["a"]);
        late.status = JobStatus::Waiting;
        f.store.insert(&late).await.unwrap();

        // First batch is all higher-priority blocked jobs
        assert_eq!(f.resolver.reconcile().await.unwrap(), 0);
        assert_eq!(f.resolver.reconcile().await.unwrap(), 1);
        let late = f.store.find_by_id("late").await.unwrap().unwrap();
        assert_eq!(late.status, JobStatus::Ready);

        // Wrapped around to the start again
        assert_eq!(f.resolver.reconcile().await.unwrap(), 0);
        assert_eq!(f.resolver.reconcile_offset.load(Ordering::SeqCst), RECONCILE_BATCH);
    }
}
