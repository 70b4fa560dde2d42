// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Cyclic dependency: job {job_id} depends on itself via {path}")]
    CyclicDependency { job_id: String, path: String },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
