//! Data-model primitives shared by every crate in the partition replica
//! transaction layer: partition-scoped row identifiers, the opaque row
//! payload, lock keys/modes, and table/partition addressing.

pub mod ids;
pub mod lock_key;
pub mod row;

pub use engine_hlc::Timestamp;
pub use ids::{PartitionId, RowId, TableId, TablePartitionId};
pub use lock_key::{IndexId, LockKey, LockMode};
pub use row::BinaryRow;
