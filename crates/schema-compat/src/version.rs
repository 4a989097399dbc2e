use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque, monotonically increasing catalog version (spec §4.5, §6:
/// "catalog version" is carried on commands but never given a concrete
/// representation).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CatalogVersion(pub u64);

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog@{}", self.0)
    }
}

impl From<u32> for CatalogVersion {
    fn from(schema_version: u32) -> Self {
        CatalogVersion(schema_version as u64)
    }
}
