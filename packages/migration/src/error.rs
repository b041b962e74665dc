use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read migration scripts at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("migration script name '{0}' does not match V{{version}}__{{name}}.sql")]
    InvalidFileName(String),
    #[error("migration version {0} must be greater than zero")]
    InvalidVersion(i64),
    #[error("migration version {0} is defined more than once")]
    DuplicateVersion(i64),
    #[error("migration version {next} follows {previous}; versions must strictly increase")]
    OutOfOrder { previous: i64, next: i64 },
    #[error("migration script for version {0} is empty")]
    EmptyScript(i64),
}
