//! Database provisioning and transactional schema migration.
//! Used by the migration host binary and its integration tests.

pub mod config;
pub mod error;
pub mod infra;
pub mod lifecycle;

pub use config::db;
pub use config::{ConnectionDescriptor, DbKind, MigrationSettings, RetrySettings};
pub use error::MigrationError;
pub use infra::db::{ApplyReport, EnsureOutcome, ExecutionStrategy, RetryPolicy};
pub use lifecycle::{
    spawn_migration_worker, HostLifetime, MigrationReport, MigrationTarget, MigrationWorker,
};
