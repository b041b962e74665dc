use std::fmt;

use crate::error::CatalogError;

/// Hex blake3 digest of a script body. Stored in the ledger so drift between
/// an applied script and its current file can be detected.
pub fn checksum(sql: &str) -> String {
    blake3::hash(sql.as_bytes()).to_hex().to_string()
}

/// One atomic, versioned schema change.
#[derive(Clone, PartialEq, Eq)]
pub struct SchemaStep {
    version: i64,
    name: String,
    sql: String,
    checksum: String,
}

impl SchemaStep {
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = checksum(&sql);
        Self {
            version,
            name: name.into(),
            sql,
            checksum,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

// Scripts can be long; keep Debug output to the identifying bits.
impl fmt::Debug for SchemaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaStep")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Ordered sequence of schema steps.
///
/// INVARIANT: versions are positive and strictly increasing. The order is
/// owned by whoever supplies the steps, so construction validates it instead
/// of sorting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaVersion {
    steps: Vec<SchemaStep>,
}

impl SchemaVersion {
    pub fn new(steps: Vec<SchemaStep>) -> Result<Self, CatalogError> {
        let mut previous: Option<i64> = None;
        for step in &steps {
            if step.version <= 0 {
                return Err(CatalogError::InvalidVersion(step.version));
            }
            if step.sql.trim().is_empty() {
                return Err(CatalogError::EmptyScript(step.version));
            }
            if let Some(prev) = previous {
                if step.version == prev {
                    return Err(CatalogError::DuplicateVersion(prev));
                }
                if step.version < prev {
                    return Err(CatalogError::OutOfOrder {
                        previous: prev,
                        next: step.version,
                    });
                }
            }
            previous = Some(step.version);
        }
        Ok(Self { steps })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Version the database ends up at once every step is applied.
    pub fn target(&self) -> Option<i64> {
        self.steps.last().map(|s| s.version)
    }

    pub fn get(&self, version: i64) -> Option<&SchemaStep> {
        self.steps
            .binary_search_by_key(&version, |s| s.version)
            .ok()
            .map(|idx| &self.steps[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<'a> IntoIterator for &'a SchemaVersion {
    type Item = &'a SchemaStep;
    type IntoIter = std::slice::Iter<'a, SchemaStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
