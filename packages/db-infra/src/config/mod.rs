pub mod db;

pub use db::{sanitize_db_url, ConnectionDescriptor, DbKind, MigrationSettings, RetrySettings};
