use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a table within the catalog.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

impl From<u32> for TableId {
    fn from(v: u32) -> Self {
        TableId(v)
    }
}

/// Identifies a partition of a partitioned table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition#{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(v: u32) -> Self {
        PartitionId(v)
    }
}

/// Addresses one partition group: a (table, partition) pair. Every inbound
/// replica request and every index key in the coordination store is scoped
/// by a `TablePartitionId`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TablePartitionId {
    pub table_id: TableId,
    pub partition_id: PartitionId,
}

impl TablePartitionId {
    pub const fn new(table_id: TableId, partition_id: PartitionId) -> Self {
        TablePartitionId { table_id, partition_id }
    }
}

impl fmt::Display for TablePartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.table_id.0, self.partition_id.0)
    }
}

/// A partition-scoped row identifier.
///
/// `uuid` is a 128-bit value chosen so that natural (lexicographic) ordering
/// of `RowId`s yields a deterministic, global lock-acquisition order: the
/// lock manager and multi-row update paths sort row ids by this `Ord` impl
/// rather than running a deadlock detector.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub partition_id: PartitionId,
    pub uuid: Uuid,
}

impl RowId {
    pub fn new(partition_id: PartitionId, uuid: Uuid) -> Self {
        RowId { partition_id, uuid }
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({}, {})", self.partition_id, self.uuid)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition_id.0, self.uuid)
    }
}

/// Sorts `row_ids` into the lock-acquisition order mandated by the deadlock
/// avoidance rule in the lock manager: natural `RowId` order, with
/// duplicates removed so a multi-row update never attempts to lock the same
/// row twice.
pub fn sorted_unique_row_ids(mut row_ids: Vec<RowId>) -> Vec<RowId> {
    row_ids.sort_unstable();
    row_ids.dedup();
    row_ids
}
