pub mod applier;
pub mod classify;
pub mod core;
pub mod ensure;
pub mod strategy;

pub use applier::{apply, apply_with_descriptor, applied_versions, ledger_entries, ApplyReport, LedgerEntry};
pub use classify::{classify, Fault};
pub use ensure::{creator_for, ensure_database, DatabaseCreator, EnsureOutcome};
pub use strategy::{AttemptOutcome, ExecutionAttempt, ExecutionStrategy, RetryPolicy};
