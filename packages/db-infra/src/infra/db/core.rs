use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::debug;

use crate::config::db::{sanitize_db_url, DbKind};

const APPLICATION_NAME: &str = "migration-host";

/// Open a single-connection pool for one guarded attempt.
///
/// INVARIANT: min=max=1 so every statement of an attempt runs on the same
/// physical session, and the handle is never shared across attempts.
pub async fn connect_single(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(url);
    opt.min_connections(1)
        .max_connections(1)
        .connect_timeout(Duration::from_secs(5))
        .acquire_timeout(Duration::from_secs(2))
        .sqlx_logging(true);

    debug!(url = %sanitize_db_url(url), "opening migration connection");
    Database::connect(opt).await
}

/// Ordered session-level statements applied before migrating.
pub fn session_statements(db_kind: DbKind) -> Vec<String> {
    match db_kind {
        DbKind::SqliteFile => vec![
            "PRAGMA foreign_keys = ON;".to_string(),
            "PRAGMA busy_timeout = 5000;".to_string(),
        ],
        DbKind::Postgres => vec![
            format!(
                "SET application_name = '{}';",
                APPLICATION_NAME.replace('\'', "''")
            ),
            "SET timezone = 'UTC';".to_string(),
            "SET lock_timeout = '10s';".to_string(),
        ],
    }
}

/// Connect to the target database and apply session settings.
pub async fn connect_target(url: &str, db_kind: DbKind) -> Result<DatabaseConnection, DbErr> {
    let conn = connect_single(url).await?;
    for stmt in session_statements(db_kind) {
        if let Err(e) = conn.execute_unprepared(&stmt).await {
            close_quietly(conn).await;
            return Err(e);
        }
    }
    Ok(conn)
}

/// Close a pool without letting a close failure mask the attempt's result.
pub async fn close_quietly(conn: DatabaseConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "closing migration connection returned error");
    }
}

/// Quote an identifier for DDL that cannot take bind parameters
/// (`CREATE DATABASE`).
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
