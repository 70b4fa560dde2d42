// Domain Layer - Pure business logic and entities

pub mod error;
pub mod graph;
pub mod job;
pub mod schedule;
pub mod status;

// Re-exports
pub use error::DomainError;
pub use graph::DependencyGraph;
pub use job::{
    parse_priority, FailureRecord, Job, JobId, JobPayload, JobSpec, JobType, LogEntry, LogLevel,
    Priority, PriorityLevel, Progress, RepeatOptions, RepeatWait, RetryBackoff, RetryOptions,
    RunId, FOREVER,
};
pub use schedule::{next_occurrence, CalendarSchedule};
pub use status::{JobStatus, Transition};
