//! Shared harness: a queue engine over a real SQLite store and a manual clock

#![allow(dead_code)]

use std::sync::Arc;

use jobq_core::application::{
    DoneOptions, DoneOutcome, FailOptions, GetJobOptions, GetWorkRequest, JobServer, QueueConfig,
    QueueEngine,
};
use jobq_core::domain::{Job, JobSpec, JobStatus};
use jobq_core::port::id_provider::UuidProvider;
use jobq_core::port::time_provider::mocks::MockTimeProvider;
use jobq_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};

/// 2023-11-14T22:13:20Z
pub const START: i64 = 1_700_000_000_000;

pub struct Harness {
    pub engine: Arc<QueueEngine>,
    pub server: Arc<JobServer>,
    pub clock: Arc<MockTimeProvider>,
}

/// Unique on-disk database path
pub fn temp_db() -> String {
    std::env::temp_dir()
        .join(format!("jobq-test-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned()
}

pub async fn memory() -> Harness {
    open("sqlite::memory:", Arc::new(MockTimeProvider::new(START))).await
}

pub async fn open(db: &str, clock: Arc<MockTimeProvider>) -> Harness {
    open_with(db, clock, QueueConfig::default()).await
}

pub async fn open_with(db: &str, clock: Arc<MockTimeProvider>, config: QueueConfig) -> Harness {
    let pool = create_pool(db).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let store = Arc::new(SqliteJobStore::new(pool, clock.clone()));
    let engine = Arc::new(QueueEngine::new(
        store,
        clock.clone(),
        Arc::new(UuidProvider),
        config,
    ));
    engine.set_serving(true);
    let server = Arc::new(JobServer::new(engine.clone()));

    Harness {
        engine,
        server,
        clock,
    }
}

pub fn email(id: &str) -> JobSpec {
    JobSpec::new("email", serde_json::json!({ "to": "ops@example.com" })).with_id(id)
}

impl Harness {
    pub async fn job(&self, id: &str) -> Job {
        self.engine
            .get_job(id, GetJobOptions::full())
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("job {} missing", id))
    }

    pub async fn status(&self, id: &str) -> JobStatus {
        self.job(id).await.status
    }

    pub async fn claim(&self) -> Option<Job> {
        self.engine
            .get_work(&GetWorkRequest::new("email"))
            .await
            .unwrap()
            .pop()
    }

    pub async fn claim_with_lease(&self, work_timeout: i64) -> Job {
        self.engine
            .get_work(&GetWorkRequest::new("email").work_timeout(work_timeout))
            .await
            .unwrap()
            .pop()
            .expect("nothing to claim")
    }

    pub async fn done(&self, job: &Job) -> DoneOutcome {
        self.engine
            .done(
                &job.id,
                job.run_id.as_deref().unwrap(),
                serde_json::json!({ "ok": true }),
                DoneOptions {
                    repeat_id: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    pub async fn fail(&self, job: &Job) -> bool {
        self.engine
            .fail(
                &job.id,
                job.run_id.as_deref().unwrap(),
                serde_json::json!({ "error": "smtp down" }),
                FailOptions::default(),
            )
            .await
            .unwrap()
    }
}
