use std::env;
use std::path::PathBuf;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::MigrationError;

// Userinfo component of a URL: everything that could end or confuse it.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Database engine the runner talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Postgres,
    SqliteFile,
}

impl DbKind {
    pub fn engine(self) -> &'static str {
        match self {
            DbKind::Postgres => "postgresql",
            DbKind::SqliteFile => "sqlite",
        }
    }

    fn parse(raw: &str) -> Result<Self, MigrationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DbKind::Postgres),
            "sqlite-file" | "sqlite" => Ok(DbKind::SqliteFile),
            other => Err(MigrationError::config(format!(
                "Unsupported MIGRATION_DB_KIND '{other}' (use postgres | sqlite-file)"
            ))),
        }
    }
}

impl From<DbKind> for sea_orm::DatabaseBackend {
    fn from(kind: DbKind) -> Self {
        match kind {
            DbKind::Postgres => sea_orm::DatabaseBackend::Postgres,
            DbKind::SqliteFile => sea_orm::DatabaseBackend::Sqlite,
        }
    }
}

/// Where the target database lives and how to reach it.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    Postgres {
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
        /// Database used to check for and create the target database.
        maintenance_database: String,
    },
    SqliteFile { path: PathBuf },
}

impl ConnectionDescriptor {
    pub fn kind(&self) -> DbKind {
        match self {
            ConnectionDescriptor::Postgres { .. } => DbKind::Postgres,
            ConnectionDescriptor::SqliteFile { .. } => DbKind::SqliteFile,
        }
    }

    /// Name of the target database (file path for SQLite).
    pub fn database_name(&self) -> String {
        match self {
            ConnectionDescriptor::Postgres { database, .. } => database.clone(),
            ConnectionDescriptor::SqliteFile { path } => path.display().to_string(),
        }
    }

    /// URL of the target database itself.
    pub fn database_url(&self) -> String {
        match self {
            ConnectionDescriptor::Postgres { database, .. } => self.postgres_url(database),
            ConnectionDescriptor::SqliteFile { path } => format!("sqlite://{}", path.display()),
        }
    }

    /// URL used by the existence check. For SQLite this opens the file in
    /// read-write-create mode, which is how the file gets created.
    pub fn maintenance_url(&self) -> String {
        match self {
            ConnectionDescriptor::Postgres {
                maintenance_database,
                ..
            } => self.postgres_url(maintenance_database),
            ConnectionDescriptor::SqliteFile { path } => {
                format!("sqlite://{}?mode=rwc", path.display())
            }
        }
    }

    /// Target URL with the password masked, safe for logs.
    pub fn sanitized(&self) -> String {
        sanitize_db_url(&self.database_url())
    }

    fn postgres_url(&self, database: &str) -> String {
        match self {
            ConnectionDescriptor::Postgres {
                host,
                port,
                username,
                password,
                ..
            } => format!(
                "postgresql://{}:{}@{host}:{port}/{}",
                utf8_percent_encode(username, USERINFO),
                utf8_percent_encode(password, USERINFO),
                utf8_percent_encode(database, USERINFO),
            ),
            ConnectionDescriptor::SqliteFile { .. } => self.database_url(),
        }
    }
}

// Never print credentials, even in debug output.
impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sanitized())
    }
}

/// Sanitize database URL by masking password in connection strings.
pub fn sanitize_db_url(url: &str) -> String {
    let Some((auth_part, host_part)) = url.rsplit_once('@') else {
        return url.to_string();
    };
    let Some(scheme_end) = auth_part.find("://") else {
        return url.to_string();
    };
    match auth_part[scheme_end + 3..].find(':') {
        Some(colon_pos) => {
            let scheme_user = &auth_part[..scheme_end + 3 + colon_pos];
            format!("{scheme_user}:***@{host_part}")
        }
        None => url.to_string(),
    }
}

/// Retry budget for one guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(5000),
        }
    }
}

/// Everything the runner needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub connection: ConnectionDescriptor,
    pub scripts_dir: PathBuf,
    pub ensure_database: bool,
    /// Budget for the existence check/create step.
    pub ensure_retry: RetrySettings,
    /// Budget for the transactional apply step.
    pub apply_retry: RetrySettings,
}

impl MigrationSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, MigrationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read settings through `lookup`, so callers (and tests) can supply
    /// values without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MigrationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let kind = match vars.get("MIGRATION_DB_KIND") {
            Some(raw) => DbKind::parse(&raw)?,
            None => DbKind::Postgres,
        };

        let connection = match kind {
            DbKind::Postgres => ConnectionDescriptor::Postgres {
                host: vars.or("POSTGRES_HOST", "localhost"),
                port: vars.parsed("POSTGRES_PORT", 5432u16)?,
                database: vars.must("MIGRATION_DB_NAME")?,
                username: vars.must("MIGRATION_DB_USER")?,
                password: vars.must("MIGRATION_DB_PASSWORD")?,
                maintenance_database: vars.or("POSTGRES_MAINTENANCE_DB", "postgres"),
            },
            DbKind::SqliteFile => ConnectionDescriptor::SqliteFile {
                path: PathBuf::from(vars.must("MIGRATION_SQLITE_PATH")?),
            },
        };

        let shared = RetrySettings {
            max_attempts: vars.parsed("MIGRATION_MAX_ATTEMPTS", RetrySettings::default().max_attempts)?,
            base_delay: vars.millis("MIGRATION_BACKOFF_BASE_MS", RetrySettings::default().base_delay)?,
            max_delay: vars.millis("MIGRATION_BACKOFF_MAX_MS", RetrySettings::default().max_delay)?,
        };

        let ensure_retry = RetrySettings {
            max_attempts: vars.parsed("MIGRATION_ENSURE_MAX_ATTEMPTS", shared.max_attempts)?,
            base_delay: vars.millis("MIGRATION_ENSURE_BACKOFF_BASE_MS", shared.base_delay)?,
            ..shared
        };
        let apply_retry = RetrySettings {
            max_attempts: vars.parsed("MIGRATION_APPLY_MAX_ATTEMPTS", shared.max_attempts)?,
            base_delay: vars.millis("MIGRATION_APPLY_BACKOFF_BASE_MS", shared.base_delay)?,
            ..shared
        };

        for (name, retry) in [("ensure", &ensure_retry), ("apply", &apply_retry)] {
            if retry.max_attempts == 0 {
                return Err(MigrationError::config(format!(
                    "{name} retry budget must allow at least one attempt"
                )));
            }
        }

        Ok(Self {
            connection,
            scripts_dir: PathBuf::from(vars.or("MIGRATION_SCRIPTS_DIR", "migrations")),
            ensure_database: vars.parsed("MIGRATION_ENSURE_DATABASE", true)?,
            ensure_retry,
            apply_retry,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    /// Get required variable or return error
    fn must(&self, name: &str) -> Result<String, MigrationError> {
        self.get(name).ok_or_else(|| {
            MigrationError::config(format!("Required environment variable '{name}' is not set"))
        })
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str, default: T) -> Result<T, MigrationError> {
        match self.get(name) {
            Some(raw) => raw.trim().parse::<T>().map_err(|_| {
                MigrationError::config(format!("Environment variable '{name}' has invalid value '{raw}'"))
            }),
            None => Ok(default),
        }
    }

    fn millis(&self, name: &str, default: Duration) -> Result<Duration, MigrationError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parsed(name, default_ms).map(Duration::from_millis)
    }
}
