// Job Server lifecycle
//
// Owns the periodic lease sweep and the "serving" switch of the engine.
// The engine starts stopped; `start` begins handing out work and spawns the
// sweep loop, `shutdown` stops both and fails whatever is still running once
// the grace period is over.

use crate::application::constants::SHUTDOWN_FAILURE_REASON;
use crate::application::engine::QueueEngine;
use crate::domain::JobStatus;
use crate::error::Result;
use crate::port::JobQuery;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Stop signal for the sweep loop
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is signalled (or the sender is gone)
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

/// Counts from one sweep tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub repossessed: usize,
    pub promoted: usize,
}

struct SweepHandle {
    shutdown: ShutdownSender,
    task: JoinHandle<()>,
}

pub struct JobServer {
    engine: Arc<QueueEngine>,
    sweep: Mutex<Option<SweepHandle>>,
}

impl JobServer {
    pub fn new(engine: Arc<QueueEngine>) -> Self {
        Self {
            engine,
            sweep: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<QueueEngine> {
        &self.engine
    }

    pub async fn is_running(&self) -> bool {
        self.sweep.lock().await.is_some()
    }

    /// Start serving work and the sweep loop. False if already running.
    pub async fn start(&self) -> bool {
        let mut sweep = self.sweep.lock().await;
        if sweep.is_some() {
            warn!("Job server already running");
            return false;
        }

        let (shutdown, token) = shutdown_channel();
        let engine = self.engine.clone();
        let task = tokio::spawn(sweep_loop(engine, token));

        self.engine.set_serving(true);
        *sweep = Some(SweepHandle { shutdown, task });

        info!(
            sweep_interval_ms = self.engine.config().sweep_interval.as_millis() as u64,
            "Job server started"
        );
        true
    }

    /// Stop handing out work, wait up to `timeout` for running jobs to
    /// finish, then fail the rest. Returns the number of jobs failed.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<usize> {
        let handle = self.sweep.lock().await.take();
        let Some(handle) = handle else {
            warn!("Job server not running");
            return Ok(0);
        };

        self.engine.set_serving(false);
        let timeout = timeout.unwrap_or(self.engine.config().shutdown_timeout);
        info!(timeout_ms = timeout.as_millis() as u64, "Job server shutting down");

        self.drain(timeout).await?;

        handle.shutdown.shutdown();
        if let Err(e) = handle.task.await {
            error!(error = ?e, "Sweep loop ended abnormally");
        }

        let failed = self
            .engine
            .lease_manager()
            .fail_all_running(SHUTDOWN_FAILURE_REASON)
            .await?;
        if failed > 0 {
            warn!(failed, "Running jobs failed at shutdown");
        }
        info!("Job server stopped");
        Ok(failed)
    }

    async fn drain(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let running = JobQuery::new().statuses(&[JobStatus::Running]).limit(1);

        while Instant::now() < deadline {
            if self.engine.find_jobs(&running).await?.is_empty() {
                return Ok(());
            }
            let left = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.engine.config().poll_interval.min(left)).await;
        }
        Ok(())
    }

    /// One sweep tick, outside the loop
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        sweep_tick(&self.engine).await
    }
}

async fn sweep_tick(engine: &QueueEngine) -> Result<SweepStats> {
    let repossessed = engine.lease_manager().sweep().await?;
    let promoted = engine.resolver().reconcile().await?;
    Ok(SweepStats {
        repossessed,
        promoted,
    })
}

async fn sweep_loop(engine: Arc<QueueEngine>, mut token: ShutdownToken) {
    let mut tick = interval(engine.config().sweep_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = sweep_tick(&engine).await {
                    error!(error = ?e, "Lease sweep failed");
                }
            }
            _ = token.wait() => break,
        }
    }
    info!("Sweep loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::QueueConfig;
    use crate::application::options::{GetWorkRequest, SaveOptions};
    use crate::domain::JobSpec;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::MockTimeProvider;

    fn server() -> (JobServer, Arc<MockTimeProvider>) {
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let store = Arc::new(InMemoryJobStore::new(clock.clone()));
        let config = QueueConfig {
            sweep_interval: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            ..QueueConfig::default()
        };
        let engine = Arc::new(QueueEngine::new(
            store,
            clock.clone(),
            Arc::new(SequentialIdProvider::new("id")),
            config,
        ));
        (JobServer::new(engine), clock)
    }

    #[tokio::test]
    async fn test_shutdown_token() {
        let (tx, mut token) = shutdown_channel();
        assert!(!token.is_shutdown());
        tx.shutdown();
        token.wait().await;
        assert!(token.is_shutdown());
    }

    #[tokio::test]
    async fn test_engine_starts_stopped() {
        let (server, _) = server();
        let engine = server.engine().clone();
        engine
            .save(JobSpec::new("t", serde_json::json!({})), SaveOptions::default())
            .await
            .unwrap();
        assert!(engine.get_work(&GetWorkRequest::new("t")).await.unwrap().is_empty());

        assert!(server.start().await);
        assert!(!server.start().await);
        assert_eq!(engine.get_work(&GetWorkRequest::new("t")).await.unwrap().len(), 1);
        server.shutdown(Some(Duration::ZERO)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_fails_running_jobs() {
        let (server, _) = server();
        let engine = server.engine().clone();
        let id = engine
            .save(JobSpec::new("t", serde_json::json!({})), SaveOptions::default())
            .await
            .unwrap();
        server.start().await;
        engine.get_work(&GetWorkRequest::new("t")).await.unwrap();

        let failed = server.shutdown(Some(Duration::from_millis(30))).await.unwrap();
        assert_eq!(failed, 1);
        assert!(!server.is_running().await);

        let job = engine
            .get_job(&id, crate::application::options::GetJobOptions::full())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failures[0].error["reason"], SHUTDOWN_FAILURE_REASON);
        assert!(engine.get_work(&GetWorkRequest::new("t")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_loop_repossesses_expired_lease() {
        let (server, clock) = server();
        let engine = server.engine().clone();
        let id = engine
            .save(JobSpec::new("t", serde_json::json!({})), SaveOptions::default())
            .await
            .unwrap();
        server.start().await;
        engine
            .get_work(&GetWorkRequest::new("t").work_timeout(100))
            .await
            .unwrap();

        clock.advance(101);
        tokio::time::sleep(Duration::from_millis(80)).await;

        let job = engine
            .get_job(&id, Default::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        server.shutdown(Some(Duration::ZERO)).await.unwrap();
    }
}
