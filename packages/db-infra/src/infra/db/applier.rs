//! Transactional migration applier.
//!
//! The ledger (`schema_migrations`) lives inside the same transaction as the
//! steps it records, so "which steps ran" and "what they did" commit or roll
//! back together. Readers never observe a schema between two known versions.

use migration::{SchemaStep, SchemaVersion};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr, Statement,
    TransactionTrait,
};
use tracing::{debug, info, warn};

use crate::config::db::ConnectionDescriptor;
use crate::error::MigrationError;
use crate::infra::db::classify::migration_error;
use crate::infra::db::core::{close_quietly, connect_target};

pub const LEDGER_TABLE: &str = "schema_migrations";

/// One applied step as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Versions applied by this run, in order.
    pub applied: Vec<i64>,
    /// Steps the ledger already recorded before this run.
    pub already_applied: usize,
    pub target: Option<i64>,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Steps still to run, in increasing version order.
#[derive(Debug)]
pub struct Plan<'a> {
    pub pending: Vec<&'a SchemaStep>,
    pub already_applied: usize,
}

fn ledger_ddl(backend: DatabaseBackend) -> String {
    let applied_at = match backend {
        DatabaseBackend::Postgres => "TIMESTAMPTZ NOT NULL DEFAULT now()",
        _ => "TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (\
            version BIGINT PRIMARY KEY, \
            name TEXT NOT NULL, \
            checksum TEXT NOT NULL, \
            applied_at {applied_at}\
        )"
    )
}

fn ledger_insert(backend: DatabaseBackend, step: &SchemaStep) -> Statement {
    let sql = match backend {
        DatabaseBackend::Postgres => {
            format!("INSERT INTO {LEDGER_TABLE} (version, name, checksum) VALUES ($1, $2, $3)")
        }
        _ => format!("INSERT INTO {LEDGER_TABLE} (version, name, checksum) VALUES (?, ?, ?)"),
    };
    Statement::from_sql_and_values(
        backend,
        sql,
        vec![
            step.version().into(),
            step.name().to_string().into(),
            step.checksum().to_string().into(),
        ],
    )
}

async fn ledger_exists<C: ConnectionTrait>(conn: &C) -> Result<bool, DbErr> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres => format!(
            "SELECT CAST(CASE WHEN to_regclass('{LEDGER_TABLE}') IS NULL THEN 0 ELSE 1 END AS BIGINT) AS present"
        ),
        _ => format!(
            "SELECT CAST(COUNT(*) AS BIGINT) AS present FROM sqlite_master \
             WHERE type = 'table' AND name = '{LEDGER_TABLE}'"
        ),
    };
    let present = match conn.query_one(Statement::from_string(backend, sql)).await? {
        Some(row) => row.try_get::<i64>("", "present")?,
        None => 0,
    };
    Ok(present > 0)
}

async fn read_ledger<C: ConnectionTrait>(conn: &C) -> Result<Vec<LedgerEntry>, DbErr> {
    let backend = conn.get_database_backend();
    let rows = conn
        .query_all(Statement::from_string(
            backend,
            format!(
                "SELECT version, name, checksum, CAST(applied_at AS TEXT) AS applied_at \
                 FROM {LEDGER_TABLE} ORDER BY version"
            ),
        ))
        .await?;

    rows.iter()
        .map(|row| {
            Ok(LedgerEntry {
                version: row.try_get("", "version")?,
                name: row.try_get("", "name")?,
                checksum: row.try_get("", "checksum")?,
                applied_at: row.try_get("", "applied_at")?,
            })
        })
        .collect()
}

/// Ledger contents, or nothing when the ledger table does not exist yet.
pub async fn ledger_entries<C: ConnectionTrait>(conn: &C) -> Result<Vec<LedgerEntry>, DbErr> {
    if !ledger_exists(conn).await? {
        return Ok(Vec::new());
    }
    read_ledger(conn).await
}

/// Applied versions in increasing order (empty before the first run).
pub async fn applied_versions<C: ConnectionTrait>(conn: &C) -> Result<Vec<i64>, DbErr> {
    Ok(ledger_entries(conn)
        .await?
        .into_iter()
        .map(|e| e.version)
        .collect())
}

/// Compare the ledger with the catalog and work out what is left to run.
///
/// Fails when the database knows a version the catalog does not, when an
/// applied script has changed since it ran, or when a pending step would
/// land below an already-applied one.
pub fn plan<'a>(
    steps: &'a SchemaVersion,
    ledger: &[LedgerEntry],
) -> Result<Plan<'a>, MigrationError> {
    for entry in ledger {
        let Some(step) = steps.get(entry.version) else {
            return Err(MigrationError::migration(
                Some(entry.version),
                format!(
                    "database records version {} ({}) which the migration scripts do not define",
                    entry.version, entry.name
                ),
            ));
        };
        if step.checksum() != entry.checksum {
            return Err(MigrationError::migration(
                Some(entry.version),
                format!(
                    "script {} changed after it was applied (ledger checksum {}, script checksum {})",
                    step.name(),
                    entry.checksum,
                    step.checksum()
                ),
            ));
        }
    }

    let highest_applied = ledger.iter().map(|e| e.version).max();
    let pending: Vec<&SchemaStep> = steps
        .iter()
        .filter(|s| !ledger.iter().any(|e| e.version == s.version()))
        .collect();

    if let (Some(highest), Some(first)) = (highest_applied, pending.first()) {
        if first.version() < highest {
            return Err(MigrationError::migration(
                Some(first.version()),
                format!(
                    "version {} is pending but version {highest} is already applied; steps cannot be applied out of order",
                    first.version()
                ),
            ));
        }
    }

    Ok(Plan {
        pending,
        already_applied: ledger.len(),
    })
}

/// Where an attempt was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Creating or reading the ledger table.
    Ledger,
    Planning,
    Step(i64),
    Finished,
}

async fn apply_in_txn(
    txn: &DatabaseTransaction,
    steps: &SchemaVersion,
    stage: &mut Stage,
) -> Result<ApplyReport, MigrationError> {
    let backend = txn.get_database_backend();

    *stage = Stage::Ledger;
    txn.execute_unprepared(&ledger_ddl(backend))
        .await
        .map_err(|e| migration_error(e, None))?;

    let ledger = read_ledger(txn)
        .await
        .map_err(|e| migration_error(e, None))?;

    *stage = Stage::Planning;
    let plan = plan(steps, &ledger)?;

    debug!(
        already_applied = plan.already_applied,
        pending = plan.pending.len(),
        target = ?steps.target(),
        "migrate=plan"
    );

    let mut applied = Vec::with_capacity(plan.pending.len());
    for step in plan.pending {
        debug!(version = step.version(), name = step.name(), "migrate=step");
        *stage = Stage::Step(step.version());
        txn.execute_unprepared(step.sql())
            .await
            .map_err(|e| migration_error(e, Some(step.version())))?;
        txn.execute(ledger_insert(backend, step))
            .await
            .map_err(|e| migration_error(e, Some(step.version())))?;
        applied.push(step.version());
    }
    *stage = Stage::Finished;

    Ok(ApplyReport {
        applied,
        already_applied: plan.already_applied,
        target: steps.target(),
    })
}

/// A failure may just mean a concurrent migrator got there first: it
/// committed the ledger table we were creating, or the step we were running.
/// If the database now shows the peer's work, the failure is worth a retry,
/// which will find nothing left to do. Plan rejections are never reconciled.
async fn reconcile_with_peer(
    conn: &DatabaseConnection,
    err: MigrationError,
    stage: Stage,
) -> MigrationError {
    let version = match &err {
        MigrationError::FatalMigration { version, .. } => *version,
        _ => return err,
    };

    match (stage, version) {
        (Stage::Ledger, None) => match ledger_exists(conn).await {
            Ok(true) => {
                info!(error = %err, "migrate=ledger_created_by_peer");
                MigrationError::transient(format!(
                    "{LEDGER_TABLE} was created concurrently by another migrator"
                ))
            }
            Ok(false) => err,
            Err(e) => {
                debug!(error = %e, "ledger re-check after failure returned error");
                err
            }
        },
        (Stage::Step(step), Some(v)) if v == step => match applied_versions(conn).await {
            Ok(applied) if applied.contains(&step) => {
                info!(version = step, error = %err, "migrate=step_applied_by_peer");
                MigrationError::transient(format!(
                    "version {step} was applied concurrently by another migrator"
                ))
            }
            Ok(_) => err,
            Err(e) => {
                debug!(error = %e, "ledger re-check after failure returned error");
                err
            }
        },
        _ => err,
    }
}

/// Apply every pending step of `steps` inside one transaction.
///
/// On any failure the transaction is rolled back, leaving schema and ledger
/// exactly as they were before the call.
pub async fn apply(
    conn: &DatabaseConnection,
    steps: &SchemaVersion,
) -> Result<ApplyReport, MigrationError> {
    let txn = conn.begin().await.map_err(|e| migration_error(e, None))?;

    let mut stage = Stage::Ledger;
    match apply_in_txn(&txn, steps, &mut stage).await {
        Ok(report) => {
            txn.commit().await.map_err(|e| migration_error(e, None))?;
            Ok(report)
        }
        Err(err) => {
            // Best-effort rollback; the step error is what gets reported
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Failed to roll back migration transaction");
            }
            Err(reconcile_with_peer(conn, err, stage).await)
        }
    }
}

/// One guarded attempt: fresh connection, transactional apply, post-check.
pub async fn apply_with_descriptor(
    descriptor: &ConnectionDescriptor,
    steps: &SchemaVersion,
) -> Result<ApplyReport, MigrationError> {
    let conn = connect_target(&descriptor.database_url(), descriptor.kind())
        .await
        .map_err(|e| migration_error(e, None))?;

    let result = apply_and_verify(&conn, steps).await;
    close_quietly(conn).await;
    result
}

async fn apply_and_verify(
    conn: &DatabaseConnection,
    steps: &SchemaVersion,
) -> Result<ApplyReport, MigrationError> {
    let report = apply(conn, steps).await?;

    let applied = applied_versions(conn)
        .await
        .map_err(|e| migration_error(e, None))?;
    let expected: Vec<i64> = steps.iter().map(SchemaStep::version).collect();
    if applied != expected {
        return Err(MigrationError::migration(
            None,
            format!(
                "Migration verification failed: expected versions {expected:?}, ledger has {applied:?}"
            ),
        ));
    }

    info!(
        migrate = "counts",
        expected_count = expected.len(),
        applied_now = report.applied_count(),
        already_applied = report.already_applied
    );
    Ok(report)
}
