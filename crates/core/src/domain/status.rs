//! Job status and the transition table.
//!
//! Every status change in the queue goes through a [`Transition`]. The table
//! here is the single source of truth for "which persisted statuses may this
//! transition start from"; the store enforces it with a guarded update so a
//! transition is only ever applied against the status that is committed at
//! execution time.

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Paused,
    Ready,
    Running,
    Failed,
    Cancelled,
    Completed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Waiting,
        JobStatus::Paused,
        JobStatus::Ready,
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Completed,
    ];

    pub const CANCELLABLE: [JobStatus; 4] = [
        JobStatus::Running,
        JobStatus::Ready,
        JobStatus::Waiting,
        JobStatus::Paused,
    ];

    pub const PAUSABLE: [JobStatus; 2] = [JobStatus::Ready, JobStatus::Waiting];

    pub const REMOVABLE: [JobStatus; 3] = [
        JobStatus::Cancelled,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub const RESTARTABLE: [JobStatus; 2] = [JobStatus::Cancelled, JobStatus::Failed];

    /// Statuses a forced removal may start from (anything but a live lease)
    pub const FORCE_REMOVABLE: [JobStatus; 6] = [
        JobStatus::Waiting,
        JobStatus::Paused,
        JobStatus::Ready,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Paused => "paused",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Completed => "completed",
        }
    }

    /// `failed` counts as terminal here; a retryable failure never persists
    /// as `failed` (it goes straight back to `ready`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::ValidationError(format!("Unknown job status: {}", s)))
    }
}

/// A legal status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// waiting -> ready once every antecedent is resolved
    Promote,
    /// {waiting, running} -> ready, ignoring unresolved antecedents
    ForceReady,
    /// {ready, waiting} -> paused
    Pause,
    /// paused -> waiting (promotion follows if resolved)
    Resume,
    /// ready -> running
    Claim,
    /// running -> completed
    Complete,
    /// running -> ready with retry budget remaining, or lease repossession
    Retry,
    /// running -> failed (fatal, or budget exhausted)
    Fail,
    /// {running, ready, waiting, paused} -> cancelled
    Cancel,
    /// {cancelled, failed} -> waiting (promotion follows if resolved)
    Restart,
}

impl Transition {
    /// Statuses this transition may start from
    pub fn sources(&self) -> &'static [JobStatus] {
        match self {
            Transition::Promote => &[JobStatus::Waiting],
            Transition::ForceReady => &[JobStatus::Waiting, JobStatus::Running],
            Transition::Pause => &JobStatus::PAUSABLE,
            Transition::Resume => &[JobStatus::Paused],
            Transition::Claim => &[JobStatus::Ready],
            Transition::Complete | Transition::Retry | Transition::Fail => &[JobStatus::Running],
            Transition::Cancel => &JobStatus::CANCELLABLE,
            Transition::Restart => &JobStatus::RESTARTABLE,
        }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Promote | Transition::ForceReady | Transition::Retry => JobStatus::Ready,
            Transition::Pause => JobStatus::Paused,
            Transition::Resume | Transition::Restart => JobStatus::Waiting,
            Transition::Claim => JobStatus::Running,
            Transition::Complete => JobStatus::Completed,
            Transition::Fail => JobStatus::Failed,
            Transition::Cancel => JobStatus::Cancelled,
        }
    }
}
