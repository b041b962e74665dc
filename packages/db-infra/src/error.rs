use migration::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// Network drop, timeout, deadlock, lock contention. Retried by the
    /// execution strategy.
    #[error("Transient connection error: {message}")]
    TransientConnection { message: String },
    /// The target database does not exist and cannot be created.
    #[error("Database provisioning failed: {message}")]
    FatalProvisioning { message: String },
    #[error("Migration failed{}: {message}", version_suffix(.version))]
    FatalMigration {
        version: Option<i64>,
        message: String,
    },
    #[error("Retry budget exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<MigrationError>,
    },
    #[error("Migration cancelled")]
    Cancelled,
    #[error("Configuration error: {message}")]
    Config { message: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

fn version_suffix(version: &Option<i64>) -> String {
    version.map(|v| format!(" at version {v}")).unwrap_or_default()
}

impl MigrationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientConnection {
            message: message.into(),
        }
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::FatalProvisioning {
            message: message.into(),
        }
    }

    pub fn migration(version: Option<i64>, message: impl Into<String>) -> Self {
        Self::FatalMigration {
            version,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConnection { .. })
    }

    /// Stable label used in log fields and recorded on the migration span.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientConnection { .. } => "transient_connection",
            Self::FatalProvisioning { .. } => "fatal_provisioning",
            Self::FatalMigration { .. } => "fatal_migration",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Cancelled => "cancelled",
            Self::Config { .. } => "config",
            Self::Catalog(_) => "catalog",
        }
    }
}
