//! Versioned schema scripts consumed by the migration runner.
//!
//! The runner never authors steps; it only loads them, checks that their
//! order is sane and hands them to the applier as an opaque sequence.

mod catalog;
mod discover;
mod error;

pub use catalog::{checksum, SchemaStep, SchemaVersion};
pub use discover::{discover, parse_file_name};
pub use error::CatalogError;
