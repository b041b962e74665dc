//! Throwaway SQLite database files.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::unique_str;

/// A database file path inside its own temp directory. The file itself is
/// not created; the directory is removed on drop.
pub struct TempSqlite {
    _dir: TempDir,
    path: PathBuf,
}

impl TempSqlite {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(format!("{}.db", unique_str("migrations")));
        Ok(Self { _dir: dir, path })
    }

    /// Path to a database file nested in a directory that does not exist yet.
    pub fn nested() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir
            .path()
            .join("nested")
            .join("deeper")
            .join(format!("{}.db", unique_str("migrations")));
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connection URL that creates the file on first open.
    pub fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}
