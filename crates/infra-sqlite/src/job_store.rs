// SQLite JobStore Implementation
//
// Every mutating call runs in one transaction whose first statement is the
// guarded UPDATE (or INSERT), so the write lock is taken before anything is
// read and the guard is evaluated against the committed row.

use crate::error::{corrupt, is_unique_violation, map_sqlx_error};
use async_trait::async_trait;
use jobq_core::domain::{
    FailureRecord, Job, JobPayload, JobStatus, JobType, LogEntry, LogLevel, Progress, RepeatWait,
    RetryBackoff,
};
use jobq_core::error::{AppError, Result};
use jobq_core::port::{
    ClaimRequest, JobGuard, JobPatch, JobQuery, JobStore, Resolve, TimeProvider,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

const CLAIM_ORDER: &str = " ORDER BY priority ASC, run_after ASC, created ASC, id ASC";

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, run_id, job_type, priority, status,
                data, result, progress,
                run_after, updated, work_timeout, expires_after,
                retries, retried, repeat_retries, retry_until, retry_wait, retry_backoff,
                repeats, repeated, repeat_until, repeat_wait,
                created
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.run_id)
        .bind(job.job_type.as_str())
        .bind(job.priority)
        .bind(job.status.as_str())
        .bind(job.data.as_value().to_string())
        .bind(job.result.as_ref().map(|r| r.to_string()))
        .bind(serde_json::to_string(&job.progress)?)
        .bind(job.after)
        .bind(now)
        .bind(job.work_timeout)
        .bind(job.expires_after)
        .bind(job.retries)
        .bind(job.retried)
        .bind(job.repeat_retries)
        .bind(job.retry_until)
        .bind(job.retry_wait)
        .bind(job.retry_backoff.as_str())
        .bind(job.repeats)
        .bind(job.repeated)
        .bind(job.repeat_until)
        .bind(serde_json::to_string(&job.repeat_wait)?)
        .bind(job.created)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(AppError::Validation(format!("Job {} already exists", job.id)));
            }
            return Err(map_sqlx_error(e));
        }

        for (position, antecedent) in job.depends.iter().enumerate() {
            sqlx::query(
                "INSERT INTO job_dependencies (job_id, antecedent_id, position, resolved) VALUES (?, ?, ?, ?)",
            )
            .bind(&job.id)
            .bind(antecedent)
            .bind(position as i64)
            .bind(job.resolved.contains(antecedent))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        for entry in &job.log {
            insert_log(&mut tx, &job.id, entry).await?;
        }
        for failure in &job.failures {
            insert_failure(&mut tx, &job.id, failure).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(job_id = %job.id, "Job inserted");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        fetch_job(&mut conn, id, true).await
    }

    async fn find(&self, query: &JobQuery) -> Result<Vec<Job>> {
        if matches!(&query.ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM jobs WHERE 1 = 1");
        if let Some(ids) = &query.ids {
            qb.push(" AND id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(id.clone());
            }
            list.push_unseparated(")");
        }
        push_status_filter(&mut qb, &query.statuses);
        if !query.job_types.is_empty() {
            qb.push(" AND job_type IN (");
            let mut list = qb.separated(", ");
            for job_type in &query.job_types {
                list.push_bind(job_type.as_str().to_string());
            }
            list.push_unseparated(")");
        }
        if let Some(antecedent) = &query.depends_on {
            qb.push(" AND id IN (SELECT job_id FROM job_dependencies WHERE antecedent_id = ");
            qb.push_bind(antecedent.clone());
            qb.push(")");
        }
        if let Some(instant) = query.expired_before {
            qb.push(" AND expires_after IS NOT NULL AND expires_after < ");
            qb.push_bind(instant);
        }
        qb.push(CLAIM_ORDER);
        if query.limit.is_some() || query.offset > 0 {
            // SQLite needs a LIMIT before OFFSET; -1 means unbounded
            qb.push(" LIMIT ");
            qb.push_bind(query.limit.map_or(-1, |limit| limit as i64));
            if query.offset > 0 {
                qb.push(" OFFSET ");
                qb.push_bind(query.offset as i64);
            }
        }

        // One read transaction so rows and their relations come from one snapshot
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let rows: Vec<JobRow> = qb
            .build_query_as()
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(hydrate(&mut tx, row, query.with_history).await?);
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(jobs)
    }

    async fn update_where(&self, guard: &JobGuard, patch: &JobPatch) -> Result<bool> {
        let now = self.time_provider.now_millis();

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE jobs SET updated = ");
        qb.push_bind(now);
        push_patch_columns(&mut qb, patch)?;
        qb.push(" WHERE id = ");
        qb.push_bind(guard.id.clone());
        push_guard(&mut qb, guard);
        qb.push(" RETURNING id");

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let matched: Option<String> = qb
            .build_query_scalar()
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if matched.is_none() {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        match &patch.resolve {
            Some(Resolve::One(antecedent)) => {
                sqlx::query(
                    "UPDATE job_dependencies SET resolved = 1 WHERE job_id = ? AND antecedent_id = ?",
                )
                .bind(&guard.id)
                .bind(antecedent)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            }
            Some(Resolve::All) => {
                sqlx::query("UPDATE job_dependencies SET resolved = 1 WHERE job_id = ?")
                    .bind(&guard.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            }
            None => {}
        }
        if let Some(entry) = &patch.log {
            insert_log(&mut tx, &guard.id, entry).await?;
        }
        if let Some(failure) = &patch.failure {
            insert_failure(&mut tx, &guard.id, failure).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn claim_ready(&self, request: &ClaimRequest) -> Result<Vec<Job>> {
        if request.job_types.is_empty() || request.run_ids.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.time_provider.now_millis();
        let expires_after = request.work_timeout.map(|t| request.now.saturating_add(t));
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut claimed = Vec::with_capacity(request.run_ids.len());

        for run_id in &request.run_ids {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE jobs SET status = ");
            qb.push_bind(JobStatus::Running.as_str());
            qb.push(", run_id = ");
            qb.push_bind(run_id.clone());
            qb.push(", updated = ");
            qb.push_bind(now);
            qb.push(", work_timeout = ");
            qb.push_bind(request.work_timeout);
            qb.push(", expires_after = ");
            qb.push_bind(expires_after);
            qb.push(" WHERE id = (SELECT id FROM jobs WHERE status = ");
            qb.push_bind(JobStatus::Ready.as_str());
            qb.push(" AND run_after <= ");
            qb.push_bind(request.now);
            qb.push(" AND job_type IN (");
            let mut list = qb.separated(", ");
            for job_type in &request.job_types {
                list.push_bind(job_type.as_str().to_string());
            }
            list.push_unseparated(")");
            qb.push(CLAIM_ORDER);
            qb.push(" LIMIT 1) RETURNING id");

            let id: Option<String> = qb
                .build_query_scalar()
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            let Some(id) = id else {
                break;
            };

            if let Some(entry) = &request.log {
                let mut entry = entry.clone();
                entry.run_id = Some(run_id.clone());
                insert_log(&mut tx, &id, &entry).await?;
            }
            claimed.push(id);
        }

        let mut jobs = Vec::with_capacity(claimed.len());
        for id in &claimed {
            if let Some(job) = fetch_job(&mut tx, id, true).await? {
                jobs.push(job);
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(jobs)
    }

    async fn delete_where(&self, id: &str, statuses: &[JobStatus]) -> Result<bool> {
        if statuses.is_empty() {
            return Ok(false);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM jobs WHERE id = ");
        qb.push_bind(id.to_string());
        push_status_filter(&mut qb, statuses);

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(JobStatus::ALL
            .iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map_or(0, |(_, c)| *c);
                (*status, count)
            })
            .collect())
    }
}

fn push_status_filter(qb: &mut QueryBuilder<'_, Sqlite>, statuses: &[JobStatus]) {
    if statuses.is_empty() {
        return;
    }
    qb.push(" AND status IN (");
    let mut list = qb.separated(", ");
    for status in statuses {
        list.push_bind(status.as_str());
    }
    list.push_unseparated(")");
}

fn push_guard(qb: &mut QueryBuilder<'_, Sqlite>, guard: &JobGuard) {
    push_status_filter(qb, &guard.statuses);
    match &guard.run_id {
        Some(Some(run_id)) => {
            qb.push(" AND run_id = ");
            qb.push_bind(run_id.clone());
        }
        Some(None) => {
            qb.push(" AND run_id IS NULL");
        }
        None => {}
    }
    if let Some(instant) = guard.expired_before {
        qb.push(" AND expires_after IS NOT NULL AND expires_after < ");
        qb.push_bind(instant);
    }
    if guard.all_resolved {
        qb.push(
            " AND NOT EXISTS (SELECT 1 FROM job_dependencies d WHERE d.job_id = jobs.id AND d.resolved = 0)",
        );
    }
}

fn push_patch_columns(qb: &mut QueryBuilder<'_, Sqlite>, patch: &JobPatch) -> Result<()> {
    if let Some(status) = patch.status {
        qb.push(", status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(run_id) = &patch.run_id {
        qb.push(", run_id = ");
        qb.push_bind(run_id.clone());
    }
    if let Some(after) = patch.after {
        qb.push(", run_after = ");
        qb.push_bind(after);
    }
    if let Some(work_timeout) = patch.work_timeout {
        qb.push(", work_timeout = ");
        qb.push_bind(work_timeout);
    }
    if let Some(expires_after) = patch.expires_after {
        qb.push(", expires_after = ");
        qb.push_bind(expires_after);
    }
    if let Some(progress) = &patch.progress {
        qb.push(", progress = ");
        qb.push_bind(serde_json::to_string(progress)?);
    }
    if let Some(result) = &patch.result {
        qb.push(", result = ");
        qb.push_bind(result.to_string());
    }
    if let Some(retries) = patch.retries {
        qb.push(", retries = ");
        qb.push_bind(retries);
    }
    if let Some(retried) = patch.retried {
        qb.push(", retried = ");
        qb.push_bind(retried);
    }
    if let Some(retry_until) = patch.retry_until {
        qb.push(", retry_until = ");
        qb.push_bind(retry_until);
    }
    Ok(())
}

async fn insert_log(conn: &mut SqliteConnection, job_id: &str, entry: &LogEntry) -> Result<()> {
    let progress = entry.progress.as_ref().map(serde_json::to_string).transpose()?;
    sqlx::query(
        "INSERT INTO job_log (job_id, time, run_id, level, message, data, progress) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(entry.time)
    .bind(&entry.run_id)
    .bind(entry.level.as_str())
    .bind(&entry.message)
    .bind(entry.data.as_ref().map(|d| d.to_string()))
    .bind(progress)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn insert_failure(
    conn: &mut SqliteConnection,
    job_id: &str,
    failure: &FailureRecord,
) -> Result<()> {
    sqlx::query("INSERT INTO job_failures (job_id, time, run_id, error) VALUES (?, ?, ?, ?)")
        .bind(job_id)
        .bind(failure.time)
        .bind(&failure.run_id)
        .bind(failure.error.to_string())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

async fn fetch_job(conn: &mut SqliteConnection, id: &str, with_history: bool) -> Result<Option<Job>> {
    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    match row {
        Some(row) => Ok(Some(hydrate(conn, row, with_history).await?)),
        None => Ok(None),
    }
}

/// Attach dependency edges (and optionally history) to a row
async fn hydrate(conn: &mut SqliteConnection, row: JobRow, with_history: bool) -> Result<Job> {
    let edges: Vec<(String, bool)> = sqlx::query_as(
        "SELECT antecedent_id, resolved FROM job_dependencies WHERE job_id = ? ORDER BY position",
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let (log, failures) = if with_history {
        let log: Vec<LogRow> = sqlx::query_as(
            "SELECT time, run_id, level, message, data, progress FROM job_log WHERE job_id = ? ORDER BY id",
        )
        .bind(&row.id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let failures: Vec<FailureRow> = sqlx::query_as(
            "SELECT time, run_id, error FROM job_failures WHERE job_id = ? ORDER BY id",
        )
        .bind(&row.id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        (
            log.into_iter().map(LogRow::into_entry).collect::<Result<Vec<_>>>()?,
            failures
                .into_iter()
                .map(FailureRow::into_record)
                .collect::<Result<Vec<_>>>()?,
        )
    } else {
        (Vec::new(), Vec::new())
    };

    row.into_job(edges, log, failures)
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    run_id: Option<String>,
    job_type: String,
    priority: i32,
    status: String,
    data: String,
    result: Option<String>,
    progress: String,
    run_after: i64,
    updated: i64,
    work_timeout: Option<i64>,
    expires_after: Option<i64>,
    retries: i64,
    retried: i64,
    repeat_retries: i64,
    retry_until: Option<i64>,
    retry_wait: i64,
    retry_backoff: String,
    repeats: i64,
    repeated: i64,
    repeat_until: Option<i64>,
    repeat_wait: String,
    created: i64,
}

impl JobRow {
    fn into_job(
        self,
        edges: Vec<(String, bool)>,
        log: Vec<LogEntry>,
        failures: Vec<FailureRecord>,
    ) -> Result<Job> {
        let status: JobStatus = self.status.parse().map_err(|e| corrupt("status", e))?;
        let retry_backoff: RetryBackoff = self
            .retry_backoff
            .parse()
            .map_err(|e| corrupt("retry_backoff", e))?;
        let data: serde_json::Value =
            serde_json::from_str(&self.data).map_err(|e| corrupt("data", e))?;
        let result = self
            .result
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| corrupt("result", e))?;
        let progress: Progress =
            serde_json::from_str(&self.progress).map_err(|e| corrupt("progress", e))?;
        let repeat_wait: RepeatWait =
            serde_json::from_str(&self.repeat_wait).map_err(|e| corrupt("repeat_wait", e))?;

        let depends = edges.iter().map(|(id, _)| id.clone()).collect();
        let resolved = edges
            .into_iter()
            .filter(|(_, resolved)| *resolved)
            .map(|(id, _)| id)
            .collect();

        Ok(Job {
            id: self.id,
            run_id: self.run_id,
            job_type: JobType::new(self.job_type),
            priority: self.priority,
            status,
            data: JobPayload::new(data),
            result,
            progress,
            depends,
            resolved,
            after: self.run_after,
            updated: self.updated,
            work_timeout: self.work_timeout,
            expires_after: self.expires_after,
            log,
            failures,
            retries: self.retries,
            retried: self.retried,
            repeat_retries: self.repeat_retries,
            retry_until: self.retry_until,
            retry_wait: self.retry_wait,
            retry_backoff,
            repeats: self.repeats,
            repeated: self.repeated,
            repeat_until: self.repeat_until,
            repeat_wait,
            created: self.created,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    time: i64,
    run_id: Option<String>,
    level: String,
    message: String,
    data: Option<String>,
    progress: Option<String>,
}

impl LogRow {
    fn into_entry(self) -> Result<LogEntry> {
        let level: LogLevel = self.level.parse().map_err(|e| corrupt("job_log.level", e))?;
        Ok(LogEntry {
            time: self.time,
            run_id: self.run_id,
            level,
            message: self.message,
            data: self
                .data
                .map(|d| serde_json::from_str(&d))
                .transpose()
                .map_err(|e| corrupt("job_log.data", e))?,
            progress: self
                .progress
                .map(|p| serde_json::from_str(&p))
                .transpose()
                .map_err(|e| corrupt("job_log.progress", e))?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FailureRow {
    time: i64,
    run_id: Option<String>,
    error: String,
}

impl FailureRow {
    fn into_record(self) -> Result<FailureRecord> {
        Ok(FailureRecord {
            time: self.time,
            run_id: self.run_id,
            error: serde_json::from_str(&self.error).map_err(|e| corrupt("job_failures.error", e))?,
        })
    }
}
