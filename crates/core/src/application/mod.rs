// Application Layer - Use Cases and Business Logic

pub mod config;
pub mod constants;
pub mod dependency;
pub mod engine;
pub mod gateway;
pub mod lease;
pub mod options;
pub mod retry;
pub mod server;
pub mod state_machine;

// Re-exports
pub use config::QueueConfig;
pub use dependency::{DependencyResolver, Direction};
pub use engine::QueueEngine;
pub use gateway::QueueGateway;
pub use lease::{LeaseManager, LeaseOutcome};
pub use options::{
    CancelOptions, DoneOptions, DoneOutcome, FailOptions, GetJobOptions, GetWorkRequest,
    LogOptions, ProgressOptions, ReadyOptions, RemoveOptions, RerunOptions, RestartOptions,
    SaveOptions,
};
pub use retry::{RepeatDecision, RetryDecision};
pub use server::{shutdown_channel, JobServer, ShutdownSender, ShutdownToken, SweepStats};
pub use state_machine::StateMachine;
