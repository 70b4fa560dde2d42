// Queue Gateway
//
// Authorized entry point. Every call is checked against the authorizer
// before the engine is touched; only an explicit allow passes.

use crate::application::options::{
    CancelOptions, DoneOptions, DoneOutcome, FailOptions, GetJobOptions, GetWorkRequest,
    LogOptions, ProgressOptions, ReadyOptions, RemoveOptions, RerunOptions, RestartOptions,
    SaveOptions,
};
use crate::application::server::JobServer;
use crate::domain::{Job, JobId, JobSpec, JobStatus};
use crate::error::{AppError, Result};
use crate::port::{Authorizer, Caller, Decision, JobQuery, Method};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct QueueGateway {
    server: Arc<JobServer>,
    authorizer: Arc<dyn Authorizer>,
}

impl QueueGateway {
    pub fn new(server: Arc<JobServer>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { server, authorizer }
    }

    async fn authorize(&self, caller: &Caller, method: Method, ids: &[JobId]) -> Result<()> {
        match self.authorizer.check(caller, method, ids).await {
            Decision::Allow => Ok(()),
            decision => {
                warn!(
                    identity = %caller.identity,
                    method = %method,
                    decision = ?decision,
                    "Permission denied"
                );
                Err(AppError::PermissionDenied(format!(
                    "{} may not call {}",
                    caller.identity, method
                )))
            }
        }
    }

    pub async fn start_job_server(&self, caller: &Caller) -> Result<bool> {
        self.authorize(caller, Method::StartJobServer, &[]).await?;
        Ok(self.server.start().await)
    }

    pub async fn shutdown_job_server(
        &self,
        caller: &Caller,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        self.authorize(caller, Method::ShutdownJobServer, &[]).await?;
        self.server.shutdown(timeout).await
    }

    pub async fn job_save(&self, caller: &Caller, spec: JobSpec, options: SaveOptions) -> Result<JobId> {
        let ids: Vec<JobId> = spec.id.iter().cloned().collect();
        self.authorize(caller, Method::JobSave, &ids).await?;
        self.server.engine().save(spec, options).await
    }

    pub async fn get_job(
        &self,
        caller: &Caller,
        ids: &[JobId],
        options: GetJobOptions,
    ) -> Result<Vec<Job>> {
        self.authorize(caller, Method::GetJob, ids).await?;
        self.server.engine().get_jobs(ids, options).await
    }

    /// Per-status counts (read access)
    pub async fn stats(&self, caller: &Caller) -> Result<Vec<(JobStatus, i64)>> {
        self.authorize(caller, Method::GetJob, &[]).await?;
        self.server.engine().stats().await
    }

    /// Filtered listing (read access)
    pub async fn find_jobs(&self, caller: &Caller, query: &JobQuery) -> Result<Vec<Job>> {
        self.authorize(caller, Method::GetJob, &[]).await?;
        self.server.engine().find_jobs(query).await
    }

    pub async fn get_work(&self, caller: &Caller, request: &GetWorkRequest) -> Result<Vec<Job>> {
        self.authorize(caller, Method::GetWork, &[]).await?;
        self.server.engine().get_work(request).await
    }

    pub async fn job_progress(
        &self,
        caller: &Caller,
        id: &str,
        run_id: &str,
        completed: f64,
        total: f64,
        options: ProgressOptions,
    ) -> Result<bool> {
        self.authorize(caller, Method::JobProgress, &[id.to_string()])
            .await?;
        self.server
            .engine()
            .progress(id, run_id, completed, total, options)
            .await
    }

    pub async fn job_log(
        &self,
        caller: &Caller,
        id: &str,
        run_id: &str,
        message: &str,
        options: LogOptions,
    ) -> Result<bool> {
        self.authorize(caller, Method::JobLog, &[id.to_string()]).await?;
        self.server.engine().log(id, run_id, message, options).await
    }

    pub async fn job_done(
        &self,
        caller: &Caller,
        id: &str,
        run_id: &str,
        result: serde_json::Value,
        options: DoneOptions,
    ) -> Result<DoneOutcome> {
        self.authorize(caller, Method::JobDone, &[id.to_string()]).await?;
        self.server.engine().done(id, run_id, result, options).await
    }

    pub async fn job_fail(
        &self,
        caller: &Caller,
        id: &str,
        run_id: &str,
        error: serde_json::Value,
        options: FailOptions,
    ) -> Result<bool> {
        self.authorize(caller, Method::JobFail, &[id.to_string()]).await?;
        self.server.engine().fail(id, run_id, error, options).await
    }

    pub async fn job_pause(&self, caller: &Caller, ids: &[JobId]) -> Result<bool> {
        self.authorize(caller, Method::JobPause, ids).await?;
        self.server.engine().pause(ids).await
    }

    pub async fn job_resume(&self, caller: &Caller, ids: &[JobId]) -> Result<bool> {
        self.authorize(caller, Method::JobResume, ids).await?;
        self.server.engine().resume(ids).await
    }

    pub async fn job_ready(&self, caller: &Caller, ids: &[JobId], options: ReadyOptions) -> Result<bool> {
        self.authorize(caller, Method::JobReady, ids).await?;
        self.server.engine().ready(ids, options).await
    }

    pub async fn job_cancel(&self, caller: &Caller, ids: &[JobId], options: CancelOptions) -> Result<bool> {
        self.authorize(caller, Method::JobCancel, ids).await?;
        self.server.engine().cancel(ids, options).await
    }

    pub async fn job_restart(
        &self,
        caller: &Caller,
        ids: &[JobId],
        options: RestartOptions,
    ) -> Result<bool> {
        self.authorize(caller, Method::JobRestart, ids).await?;
        self.server.engine().restart(ids, options).await
    }

    pub async fn job_remove(&self, caller: &Caller, ids: &[JobId], options: RemoveOptions) -> Result<bool> {
        self.authorize(caller, Method::JobRemove, ids).await?;
        self.server.engine().remove(ids, options).await
    }

    pub async fn job_rerun(
        &self,
        caller: &Caller,
        id: &str,
        options: RerunOptions,
    ) -> Result<Option<JobId>> {
        self.authorize(caller, Method::JobRerun, &[id.to_string()]).await?;
        self.server.engine().rerun(id, options).await
    }
}
