use async_trait::async_trait;
use engine_primitives::{TableId, Timestamp};

use crate::change::SchemaChange;
use crate::version::CatalogVersion;

/// The catalog/schema-sync external collaborator this crate needs (spec §2,
/// "Catalog/schema sync service (external)"): resolving a timestamp to a
/// catalog version, and enumerating the schema changes a table underwent
/// between two versions. Schema DDL semantics themselves are out of scope
/// per spec §1; this is the narrow read seam the validator is built on.
#[async_trait]
pub trait CatalogHistory: Send + Sync {
    /// Waits for metadata completeness at `ts` and returns the active
    /// catalog version at that point.
    async fn catalog_version_at(&self, ts: Timestamp) -> CatalogVersion;

    /// Returns every [`SchemaChange`] affecting `table_id` with
    /// `from < version <= to`, ordered by version ascending. Empty if
    /// `from >= to` or no changes occurred.
    async fn changes_between(&self, table_id: TableId, from: CatalogVersion, to: CatalogVersion) -> Vec<SchemaChange>;
}
