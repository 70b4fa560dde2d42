// Retry / Repeat scheduling
//
// Pure decisions over a Job Record and the current instant. Persisting the
// outcome is the caller's job.

use crate::application::constants::{MSG_REPEAT, MSG_RERUN};
use crate::domain::{
    next_occurrence, Job, JobId, LogEntry, LogLevel, Progress, RepeatWait, RetryBackoff, FOREVER,
};
use crate::error::Result;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-arm as ready at `after`, with `retried` attempts consumed
    Retry { after: i64, retried: i64 },
    /// Do not retry, job has failed permanently
    Failed,
}

/// Repeat decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RepeatDecision {
    /// Insert the next occurrence, eligible at `after`
    Repeat { after: i64 },
    /// Repeat budget, window or schedule exhausted
    Finished,
}

/// Delay before attempt number `retried` (1-based)
///
/// Exponential: `wait * 2^(retried-1)`, saturating at `i64::MAX`.
pub fn backoff_delay(backoff: RetryBackoff, wait: i64, retried: i64) -> i64 {
    match backoff {
        RetryBackoff::Constant => wait,
        RetryBackoff::Exponential => {
            let exponent = (retried - 1).clamp(0, 62) as u32;
            wait.saturating_mul(1i64 << exponent)
        }
    }
}

/// Decide what a failure of the current run turns into
pub fn decide_retry(job: &Job, now: i64, fatal: bool) -> RetryDecision {
    if fatal {
        return RetryDecision::Failed;
    }
    if job.retried >= job.retries {
        warn!(
            job_id = %job.id,
            retried = job.retried,
            retries = job.retries,
            "Retry budget exhausted"
        );
        return RetryDecision::Failed;
    }
    if let Some(until) = job.retry_until {
        if now >= until {
            warn!(job_id = %job.id, retry_until = until, "Retry window closed");
            return RetryDecision::Failed;
        }
    }

    let retried = job.retried + 1;
    let delay = backoff_delay(job.retry_backoff, job.retry_wait, retried);
    let mut after = now.saturating_add(delay);
    if let Some(until) = job.retry_until {
        after = after.min(until);
    }

    info!(
        job_id = %job.id,
        attempt = retried,
        retries = job.retries,
        delay_ms = delay,
        "Scheduling retry"
    );

    RetryDecision::Retry { after, retried }
}

/// Decide whether a completed run produces another occurrence
pub fn decide_repeat(job: &Job, now: i64) -> Result<RepeatDecision> {
    if !job.is_repeating() {
        return Ok(RepeatDecision::Finished);
    }
    if let Some(until) = job.repeat_until {
        if now >= until {
            return Ok(RepeatDecision::Finished);
        }
    }

    let next = match &job.repeat_wait {
        RepeatWait::Delay(wait) => Some(now.saturating_add(*wait)),
        RepeatWait::Schedule(schedule) => next_occurrence(now, schedule)?,
    };

    match next {
        Some(after) if job.repeat_until.map_or(true, |until| after < until) => {
            Ok(RepeatDecision::Repeat { after })
        }
        _ => Ok(RepeatDecision::Finished),
    }
}

/// Fresh record continuing `job` as its next occurrence
pub fn next_occurrence_record(job: &Job, id: JobId, now: i64, after: i64) -> Job {
    let mut next = fresh_copy(job, id, now, after);
    next.repeats = if job.repeats == FOREVER {
        FOREVER
    } else {
        job.repeats - 1
    };
    next.repeated = job.repeated + 1;
    next.log = vec![LogEntry::new(now, None, LogLevel::Info, MSG_REPEAT)];
    next
}

/// Fresh record re-running a completed `job` on demand
pub fn rerun_record(
    job: &Job,
    id: JobId,
    now: i64,
    repeats: i64,
    until: Option<i64>,
    wait: i64,
) -> Job {
    let mut next = fresh_copy(job, id, now, now.saturating_add(wait.max(0)));
    next.repeats = repeats;
    next.repeat_until = until;
    next.log = vec![LogEntry::new(now, None, LogLevel::Info, MSG_RERUN)];
    next
}

fn fresh_copy(job: &Job, id: JobId, now: i64, after: i64) -> Job {
    let mut next = job.clone();
    next.id = id;
    next.run_id = None;
    next.result = None;
    next.progress = Progress::default();
    next.after = after;
    next.created = now;
    next.updated = now;
    next.work_timeout = None;
    next.expires_after = None;
    next.failures = Vec::new();
    next.retried = 0;
    next.retries = job.repeat_retries;
    next.status = next.eligible_status();
    next
}
