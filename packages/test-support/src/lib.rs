//! Test support utilities shared by the integration suites.
//!
//! Unique names via ULIDs, throwaway SQLite files, and the unified test
//! logging bootstrap.

pub mod logging;
pub mod sqlite;

use ulid::Ulid;

/// Generate a unique string with the given prefix
///
/// # Examples
/// ```
/// use test_support::unique_str;
///
/// let id1 = unique_str("db");
/// let id2 = unique_str("db");
/// assert_ne!(id1, id2);
/// assert!(id1.starts_with("db-"));
/// ```
pub fn unique_str(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}

/// Generate a unique database name: lowercase, SQL-identifier friendly.
pub fn unique_db_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string().to_lowercase())
}
