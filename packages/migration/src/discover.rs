use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::catalog::{SchemaStep, SchemaVersion};
use crate::error::CatalogError;

static SCRIPT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^V(\d+)__([A-Za-z0-9_\-]+)\.sql$").expect("script name pattern is valid")
});

/// Parse `V{version}__{name}.sql` into `(version, name)`.
///
/// `V0007__add_index.sql` → `(7, "add_index")`.
pub fn parse_file_name(file_name: &str) -> Result<(i64, String), CatalogError> {
    let caps = SCRIPT_NAME
        .captures(file_name)
        .ok_or_else(|| CatalogError::InvalidFileName(file_name.to_string()))?;

    let version = caps[1]
        .parse::<i64>()
        .map_err(|_| CatalogError::InvalidFileName(file_name.to_string()))?;
    if version <= 0 {
        return Err(CatalogError::InvalidVersion(version));
    }

    Ok((version, caps[2].to_string()))
}

/// Load every `*.sql` script in `dir` as an ordered [`SchemaVersion`].
///
/// Files without a `.sql` extension are ignored; `.sql` files with a
/// malformed name are an error rather than silently skipped.
pub fn discover(dir: &Path) -> Result<SchemaVersion, CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut steps = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();

        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            trace!(path = %path.display(), "skipping non-script entry");
            continue;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CatalogError::InvalidFileName(path.display().to_string()))?;
        let (version, name) = parse_file_name(file_name)?;

        let sql = fs::read_to_string(&path).map_err(|source| CatalogError::Io {
            path: path.clone(),
            source,
        })?;

        steps.push(SchemaStep::new(version, name, sql));
    }

    steps.sort_by_key(SchemaStep::version);
    let catalog = SchemaVersion::new(steps)?;

    debug!(
        dir = %dir.display(),
        steps = catalog.len(),
        target = ?catalog.target(),
        "migration scripts discovered"
    );

    Ok(catalog)
}
