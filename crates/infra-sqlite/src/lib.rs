// jobq Infrastructure - SQLite Adapter
// Implements: JobStore

mod connection;
mod error;
mod job_store;
mod migration;

pub use connection::create_pool;
pub use error::map_sqlx_error;
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;
