// Port Layer - Interfaces for external dependencies

pub mod authorizer;
pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod time_provider;

// Re-exports
pub use authorizer::{Authorizer, Caller, Decision, Grant, Method, Role, RoleAuthorizer};
pub use id_provider::IdProvider;
pub use job_store::{ClaimRequest, JobGuard, JobPatch, JobQuery, JobStore, Resolve};
pub use time_provider::TimeProvider;
