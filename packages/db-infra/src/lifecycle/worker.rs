//! The one-shot background job: ensure the database, apply the catalog,
//! report, and hand control back to the host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use migration::SchemaVersion;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, field, info, info_span, Instrument};

use crate::config::db::{ConnectionDescriptor, MigrationSettings};
use crate::error::MigrationError;
use crate::infra::db::applier::{apply_with_descriptor, ApplyReport};
use crate::infra::db::ensure::{creator_for, ensure_database, DatabaseCreator, EnsureOutcome};
use crate::infra::db::strategy::{ExecutionStrategy, RetryPolicy};
use crate::lifecycle::host::HostLifetime;
use crate::lifecycle::job::{JobSlot, MigrationJob};

pub const SPAN_TARGET: &str = "migrations";
pub const STOP_SOURCE: &str = "migration-worker";

/// The database the job works against. Each call is one guarded attempt and
/// must open its own connection.
#[async_trait]
pub trait MigrationTarget: Send + Sync {
    /// Engine label, recorded as `db.system`.
    fn db_system(&self) -> &'static str;

    /// Log-safe database name, recorded as `db.name`.
    fn db_name(&self) -> String;

    async fn ensure_database(&self) -> Result<EnsureOutcome, MigrationError>;

    async fn apply(&self, steps: &SchemaVersion) -> Result<ApplyReport, MigrationError>;
}

/// Production target built from a [`ConnectionDescriptor`].
pub struct DescriptorTarget {
    descriptor: ConnectionDescriptor,
    creator: Box<dyn DatabaseCreator>,
}

impl DescriptorTarget {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        let creator = creator_for(&descriptor);
        Self {
            descriptor,
            creator,
        }
    }
}

#[async_trait]
impl MigrationTarget for DescriptorTarget {
    fn db_system(&self) -> &'static str {
        self.descriptor.kind().engine()
    }

    fn db_name(&self) -> String {
        self.descriptor.database_name()
    }

    async fn ensure_database(&self) -> Result<EnsureOutcome, MigrationError> {
        ensure_database(self.creator.as_ref()).await
    }

    async fn apply(&self, steps: &SchemaVersion) -> Result<ApplyReport, MigrationError> {
        apply_with_descriptor(&self.descriptor, steps).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// `None` when the existence check was switched off.
    pub ensure: Option<EnsureOutcome>,
    pub apply: ApplyReport,
    pub attempts: u32,
    pub elapsed: Duration,
}

pub struct MigrationWorker {
    target: Arc<dyn MigrationTarget>,
    steps: SchemaVersion,
    ensure: Option<ExecutionStrategy>,
    apply: ExecutionStrategy,
}

impl MigrationWorker {
    /// `ensure_policy = None` skips the existence check entirely.
    pub fn new(
        target: Arc<dyn MigrationTarget>,
        steps: SchemaVersion,
        ensure_policy: Option<RetryPolicy>,
        apply_policy: RetryPolicy,
    ) -> Self {
        Self {
            target,
            steps,
            ensure: ensure_policy.map(|p| ExecutionStrategy::new("ensure_database", p)),
            apply: ExecutionStrategy::new("apply_migrations", apply_policy),
        }
    }

    pub fn from_settings(settings: &MigrationSettings, steps: SchemaVersion) -> Self {
        let ensure_policy = settings
            .ensure_database
            .then(|| RetryPolicy::from(settings.ensure_retry));
        Self::new(
            Arc::new(DescriptorTarget::new(settings.connection.clone())),
            steps,
            ensure_policy,
            RetryPolicy::from(settings.apply_retry),
        )
    }

    /// Run the job to completion.
    ///
    /// On success the host is asked to stop. On failure the error is recorded
    /// on the span and returned; the host decides what to do with it.
    pub async fn run(self, lifetime: HostLifetime) -> Result<MigrationReport, MigrationError> {
        let _slot = JobSlot::claim()?;

        let span = info_span!(
            target: "migrations",
            "migrating database",
            "otel.kind" = "client",
            "db.system" = self.target.db_system(),
            "db.name" = %self.target.db_name(),
            "otel.status_code" = field::Empty,
            "exception.type" = field::Empty,
            "exception.message" = field::Empty,
        );

        let started = Instant::now();
        let cancel = lifetime.stopping();
        let mut job = MigrationJob::new();

        let outcome = self
            .execute(&mut job, &cancel)
            .instrument(span.clone())
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok((ensure, apply)) => {
                job.succeed();
                span.record("otel.status_code", "OK");
                span.in_scope(|| {
                    info!(
                        applied = apply.applied_count(),
                        already_applied = apply.already_applied,
                        target_version = ?apply.target,
                        attempts = job.attempts(),
                        elapsed_ms = elapsed.as_millis(),
                        "migrate=done"
                    )
                });
                drop(span);
                lifetime.stop_application(STOP_SOURCE);
                Ok(MigrationReport {
                    ensure,
                    apply,
                    attempts: job.attempts(),
                    elapsed,
                })
            }
            Err(err) => {
                job.fail(&err);
                span.record("otel.status_code", "ERROR");
                span.record("exception.type", err.kind());
                span.record("exception.message", field::display(&err));
                span.in_scope(|| {
                    error!(
                        error = %err,
                        kind = err.kind(),
                        status = ?job.status(),
                        attempts = job.attempts(),
                        elapsed_ms = elapsed.as_millis(),
                        "migrate=failed"
                    )
                });
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job: &mut MigrationJob,
        cancel: &CancellationToken,
    ) -> Result<(Option<EnsureOutcome>, ApplyReport), MigrationError> {
        info!(
            steps = self.steps.len(),
            target_version = ?self.steps.target(),
            "migrate=start"
        );

        let ensure = match &self.ensure {
            Some(strategy) => {
                job.begin_ensure();
                let outcome = strategy
                    .run_observed(
                        cancel,
                        || self.target.ensure_database(),
                        |attempt| job.record_attempt(attempt),
                    )
                    .await?;
                Some(outcome)
            }
            None => None,
        };

        job.begin_migrate();
        let report = self
            .apply
            .run_observed(
                cancel,
                || self.target.apply(&self.steps),
                |attempt| job.record_attempt(attempt),
            )
            .await?;

        Ok((ensure, report))
    }
}

/// Run `worker` as a one-shot background task.
pub fn spawn_migration_worker(
    worker: MigrationWorker,
    lifetime: HostLifetime,
) -> JoinHandle<Result<MigrationReport, MigrationError>> {
    tokio::spawn(worker.run(lifetime))
}
