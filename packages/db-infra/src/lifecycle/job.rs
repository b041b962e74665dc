use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

use crate::error::MigrationError;
use crate::infra::db::strategy::ExecutionAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    EnsuringDatabase,
    Migrating,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// The single run-to-completion unit of a migration process.
#[derive(Debug, Clone)]
pub struct MigrationJob {
    status: JobStatus,
    attempts: u32,
    error: Option<String>,
}

impl Default for MigrationJob {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationJob {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Pending,
            attempts: 0,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Attempts made across both guarded operations.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn record_attempt(&mut self, _attempt: &ExecutionAttempt) {
        self.attempts += 1;
    }

    pub fn begin_ensure(&mut self) -> bool {
        let allowed = self.status == JobStatus::Pending;
        self.transition(JobStatus::EnsuringDatabase, allowed)
    }

    /// Pending is accepted too: the existence check can be switched off.
    pub fn begin_migrate(&mut self) -> bool {
        let allowed = matches!(self.status, JobStatus::Pending | JobStatus::EnsuringDatabase);
        self.transition(JobStatus::Migrating, allowed)
    }

    pub fn succeed(&mut self) -> bool {
        let allowed = self.status == JobStatus::Migrating;
        self.transition(JobStatus::Succeeded, allowed)
    }

    pub fn fail(&mut self, err: &MigrationError) -> bool {
        let allowed = !self.status.is_terminal();
        let moved = self.transition(JobStatus::Failed, allowed);
        if moved {
            self.error = Some(err.to_string());
        }
        moved
    }

    fn transition(&mut self, to: JobStatus, allowed: bool) -> bool {
        if !allowed {
            error!(from = ?self.status, to = ?to, "illegal migration job transition ignored");
            return false;
        }
        self.status = to;
        true
    }
}

static SLOT_TAKEN: AtomicBool = AtomicBool::new(false);

/// Process-wide claim: at most one migration job executes per process.
/// Released on drop.
#[derive(Debug)]
pub struct JobSlot {
    _private: (),
}

impl JobSlot {
    pub fn claim() -> Result<Self, MigrationError> {
        SLOT_TAKEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| JobSlot { _private: () })
            .map_err(|_| {
                MigrationError::config("a migration job is already running in this process")
            })
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        SLOT_TAKEN.store(false, Ordering::Release);
    }
}
