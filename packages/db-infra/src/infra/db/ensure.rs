//! Make sure the target database exists before anything tries to open a
//! transaction against it.

use std::path::PathBuf;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DbErr, Statement};
use tracing::{debug, info};

use crate::config::db::ConnectionDescriptor;
use crate::error::MigrationError;
use crate::infra::db::classify::{classify, provisioning_error, Fault};
use crate::infra::db::core::{close_quietly, connect_single, quote_ident};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    AlreadyExisted,
    Created,
}

/// Existence check and creation for one target database.
///
/// The check-then-create pair is not atomic: a peer may create the database
/// between `exists` and `create`, in which case `create` fails with a
/// duplicate-object error.
#[async_trait]
pub trait DatabaseCreator: Send + Sync {
    /// Log-safe name of the database being ensured.
    fn describe(&self) -> String;

    async fn exists(&self) -> Result<bool, DbErr>;

    async fn create(&self) -> Result<(), DbErr>;
}

/// Idempotently guarantee the database behind `creator` exists.
pub async fn ensure_database(
    creator: &dyn DatabaseCreator,
) -> Result<EnsureOutcome, MigrationError> {
    let target = creator.describe();

    if creator.exists().await.map_err(provisioning_error)? {
        debug!(database = %target, "ensure=exists");
        return Ok(EnsureOutcome::AlreadyExisted);
    }

    match creator.create().await {
        Ok(()) => {
            info!(database = %target, "ensure=created");
            Ok(EnsureOutcome::Created)
        }
        Err(e) => match classify(&e) {
            Fault::DuplicateObject => {
                info!(database = %target, error = %e, "ensure=created_by_peer");
                Ok(EnsureOutcome::AlreadyExisted)
            }
            Fault::Transient => Err(provisioning_error(e)),
            // Engines do not agree on how a lost race is reported, so trust
            // the catalog over the error code.
            Fault::Fatal => match creator.exists().await {
                Ok(true) => {
                    info!(database = %target, error = %e, "ensure=created_by_peer");
                    Ok(EnsureOutcome::AlreadyExisted)
                }
                Ok(false) => Err(provisioning_error(e)),
                Err(recheck) => {
                    debug!(database = %target, error = %recheck, "ensure=recheck_failed");
                    Err(provisioning_error(e))
                }
            },
        },
    }
}

/// Postgres: talk to the maintenance database, look the target up in
/// `pg_database`, `CREATE DATABASE` when missing.
pub struct PgDatabaseCreator {
    maintenance_url: String,
    database: String,
}

impl PgDatabaseCreator {
    pub fn new(maintenance_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            maintenance_url: maintenance_url.into(),
            database: database.into(),
        }
    }
}

#[async_trait]
impl DatabaseCreator for PgDatabaseCreator {
    fn describe(&self) -> String {
        self.database.clone()
    }

    async fn exists(&self) -> Result<bool, DbErr> {
        let conn = connect_single(&self.maintenance_url).await?;
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT 1 AS present FROM pg_database WHERE datname = $1",
            vec![self.database.clone().into()],
        );
        let row = conn.query_one(stmt).await;
        close_quietly(conn).await;
        Ok(row?.is_some())
    }

    async fn create(&self) -> Result<(), DbErr> {
        let conn = connect_single(&self.maintenance_url).await?;
        // CREATE DATABASE cannot run inside a transaction block or take binds.
        let result = conn
            .execute_unprepared(&format!("CREATE DATABASE {}", quote_ident(&self.database)))
            .await;
        close_quietly(conn).await;
        result.map(|_| ())
    }
}

/// SQLite: the database is a file; opening it in `mode=rwc` creates it.
pub struct SqliteFileCreator {
    path: PathBuf,
    create_url: String,
}

impl SqliteFileCreator {
    pub fn new(path: impl Into<PathBuf>, create_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_url: create_url.into(),
        }
    }
}

#[async_trait]
impl DatabaseCreator for SqliteFileCreator {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn exists(&self) -> Result<bool, DbErr> {
        tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| DbErr::Custom(format!("failed to stat {}: {e}", self.path.display())))
    }

    async fn create(&self) -> Result<(), DbErr> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DbErr::Custom(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = connect_single(&self.create_url).await?;
        // Touch the file so it is materialised on disk before we report success.
        let result = conn.execute_unprepared("PRAGMA user_version;").await;
        close_quietly(conn).await;
        result.map(|_| ())
    }
}

/// Pick the creator matching the configured engine.
pub fn creator_for(descriptor: &ConnectionDescriptor) -> Box<dyn DatabaseCreator> {
    match descriptor {
        ConnectionDescriptor::Postgres { database, .. } => Box::new(PgDatabaseCreator::new(
            descriptor.maintenance_url(),
            database.clone(),
        )),
        ConnectionDescriptor::SqliteFile { path } => Box::new(SqliteFileCreator::new(
            path.clone(),
            descriptor.maintenance_url(),
        )),
    }
}
