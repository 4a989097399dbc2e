use engine_primitives::{BinaryRow, RowId, TablePartitionId, Timestamp};
use uuid::Uuid;

use crate::chain::ReadResult;
use crate::error::StorageError;

/// A snapshot of a version chain's head, cheap to copy out from under the
/// per-row lock so callers can decide what to do next without holding it.
#[derive(Clone, Debug)]
pub enum HeadSnapshot {
    Intent {
        tx_id: Uuid,
        commit_partition: TablePartitionId,
        newest_committed_ts: Option<Timestamp>,
    },
    NoIntent {
        newest_committed_ts: Option<Timestamp>,
    },
}

/// The storage contract the update handler and replica listener need from a
/// partition's multi-version row store. Spec §2 lists "MVCC partition
/// storage" as an external collaborator; this trait is the seam, with
/// [`crate::memory::InMemoryPartitionStorage`] as the one concrete
/// implementation this workspace ships (a page-store/RocksDB-backed
/// implementation is explicitly out of scope per spec §1).
pub trait PartitionStorage: Send + Sync {
    /// Resolves a read at `read_ts` against the row's version chain.
    fn read(&self, row_id: RowId, read_ts: Timestamp) -> ReadResult;

    /// Reads ignoring any write intent, returning the newest committed
    /// version with `commit_ts <= read_ts`.
    fn read_committed(&self, row_id: RowId, read_ts: Timestamp) -> ReadResult;

    /// Peeks the chain head without committing to a read-time resolution
    /// decision; used by the speculative-cleanup path.
    fn peek_head(&self, row_id: RowId) -> HeadSnapshot;

    /// Writes a new write intent for `tx_id`, replacing the previous intent
    /// of the same tx_id if present (so the caller isn't required to
    /// special-case "this is actually a re-write under the same
    /// transaction"). Returns an error via the handler only if an invariant
    /// is violated (e.g. someone tries to add an intent while a *different*
    /// tx's intent already sits at the head — that's a caller bug, not a
    /// recoverable storage condition, so it's enforced with an assertion in
    /// the update handler rather than surfaced here).
    fn add_write_intent(&self, row_id: RowId, tx_id: Uuid, commit_partition: TablePartitionId, row: Option<BinaryRow>);

    /// Writes a version directly as committed at `commit_ts` (the one-phase
    /// commit path): no intent is created.
    fn add_committed_write(&self, row_id: RowId, commit_ts: Timestamp, row: Option<BinaryRow>);

    /// Converts the current write intent (whichever transaction it belongs
    /// to) into a committed version at `commit_ts`.
    fn commit_write(&self, row_id: RowId, commit_ts: Timestamp) -> Result<(), StorageError>;

    /// Discards the current write intent without committing it.
    fn abort_write(&self, row_id: RowId) -> Result<(), StorageError>;

    /// Returns the row ids with chains currently known to storage, for GC
    /// and index-rebuild scans. Order is unspecified but stable between
    /// calls absent concurrent mutation.
    fn row_ids(&self) -> Vec<RowId>;

    /// Removes committed versions made obsolete by `low_watermark`, scanning
    /// at most `batch_size` row chains starting from the internal resume
    /// cursor. Returns the number of chains scanned.
    fn gc_pass(&self, low_watermark: Timestamp, batch_size: usize) -> usize;
}
