//! DbErr -> retry decision.
//!
//! Connectivity failures, timeouts, deadlocks and lock contention are
//! transient. Constraint violations, authorization failures and malformed
//! statements are fatal. "Duplicate object" is reported separately so the
//! existence ensurer can treat a lost creation race as success.

use sea_orm::{DbErr, RuntimeErr};

use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Fatal,
    DuplicateObject,
}

fn mentions_sqlstate(msg: &str, code: &str) -> bool {
    msg.contains(&format!("SQLSTATE({code})")) || msg.contains(&format!("SQLSTATE {code}"))
}

const PG_TRANSIENT: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "53300", // too_many_connections
    "55P03", // lock_not_available
    "57014", // query_canceled (statement_timeout)
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

const PG_DUPLICATE: &[&str] = &[
    "42P04", // duplicate_database
    "42P06", // duplicate_schema
];

// Concurrent CREATE DATABASE past the existence check collides on the
// catalog's unique index and reports unique_violation instead of 42P04.
const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_DATABASE_NAME_INDEX: &str = "pg_database_datname_index";

// SQLite (extended) result codes surfaced by sqlx: BUSY, LOCKED and their
// recovery/snapshot variants.
const SQLITE_TRANSIENT: &[&str] = &["5", "6", "261", "262", "517", "773"];

/// SQLSTATE (or SQLite result code) carried by the driver error, if any.
fn driver_code(err: &DbErr) -> Option<String> {
    let runtime = match err {
        DbErr::Exec(e) | DbErr::Query(e) | DbErr::Conn(e) => e,
        _ => return None,
    };
    match runtime {
        RuntimeErr::SqlxError(e) => e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned()),
        _ => None,
    }
}

fn sqlx_transport_failure(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::Exec(e) | DbErr::Query(e) | DbErr::Conn(e) => e,
        _ => return false,
    };
    matches!(
        runtime,
        RuntimeErr::SqlxError(
            sea_orm::sqlx::Error::Io(_)
                | sea_orm::sqlx::Error::PoolTimedOut
                | sea_orm::sqlx::Error::PoolClosed
                | sea_orm::sqlx::Error::WorkerCrashed
        )
    )
}

fn classify_code(code: &str) -> Fault {
    if PG_DUPLICATE.contains(&code) {
        return Fault::DuplicateObject;
    }
    if PG_TRANSIENT.contains(&code) || code.starts_with("08") || SQLITE_TRANSIENT.contains(&code) {
        return Fault::Transient;
    }
    Fault::Fatal
}

/// Decide whether `err` is worth retrying.
pub fn classify(err: &DbErr) -> Fault {
    let msg = err.to_string();

    if let Some(code) = driver_code(err) {
        if code == PG_UNIQUE_VIOLATION && msg.contains(PG_DATABASE_NAME_INDEX) {
            return Fault::DuplicateObject;
        }
        return classify_code(&code);
    }

    if mentions_sqlstate(&msg, PG_UNIQUE_VIOLATION) && msg.contains(PG_DATABASE_NAME_INDEX) {
        return Fault::DuplicateObject;
    }

    // Wrapped or stringly errors may still carry the code in their message.
    for code in PG_DUPLICATE.iter().chain(PG_TRANSIENT) {
        if mentions_sqlstate(&msg, code) {
            return classify_code(code);
        }
    }
    if msg.contains("SQLSTATE(08") || msg.contains("SQLSTATE 08") {
        return Fault::Transient;
    }
    if msg.contains("SQLSTATE") {
        return Fault::Fatal;
    }

    if matches!(err, DbErr::ConnectionAcquire(_) | DbErr::Conn(_)) || sqlx_transport_failure(err) {
        return Fault::Transient;
    }

    let lowered = msg.to_ascii_lowercase();
    if lowered.contains("timeout")
        || lowered.contains("timed out")
        || lowered.contains("connection refused")
        || lowered.contains("connection reset")
        || lowered.contains("broken pipe")
        || lowered.contains("deadlock")
        || lowered.contains("database is locked")
        || lowered.contains("sqlite_busy")
    {
        return Fault::Transient;
    }

    if lowered.contains("already exists") {
        return Fault::DuplicateObject;
    }

    Fault::Fatal
}

/// Map a failure of the existence check/create step into the taxonomy.
pub fn provisioning_error(err: DbErr) -> MigrationError {
    match classify(&err) {
        Fault::Transient => MigrationError::transient(err.to_string()),
        Fault::Fatal | Fault::DuplicateObject => MigrationError::provisioning(err.to_string()),
    }
}

/// Map a failure inside the migration transaction into the taxonomy.
pub fn migration_error(err: DbErr, version: Option<i64>) -> MigrationError {
    match classify(&err) {
        Fault::Transient => MigrationError::transient(err.to_string()),
        Fault::Fatal | Fault::DuplicateObject => MigrationError::migration(version, err.to_string()),
    }
}
