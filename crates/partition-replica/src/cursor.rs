use engine_primitives::{IndexId, RowId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

/// A batched scan cursor over a (pre-sorted) sequence of row ids backing
/// one `RW_SCAN`/`RO_SCAN` request (spec §4.3, "Batched cursor with locked
/// range keys"). Index traversal itself belongs to the storage-engine /
/// index-structure layer excluded per spec §1; this crate only needs to
/// remember where a paginated scan left off and hand back the next batch.
struct ScanCursor {
    remaining: Vec<RowId>,
    position: usize,
}

impl ScanCursor {
    fn next_batch(&mut self, batch_size: usize) -> Vec<RowId> {
        let end = (self.position + batch_size).min(self.remaining.len());
        let batch = self.remaining[self.position..end].to_vec();
        self.position = end;
        batch
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.remaining.len()
    }
}

/// Every scan cursor a partition replica currently holds open, keyed by the
/// enlisting transaction and the index it scans. Spec §4.3
/// `processTxCleanupAction` step 1: "Close every cursor held by txId".
#[derive(Default)]
pub struct CursorRegistry {
    cursors: Mutex<FxHashMap<(Uuid, IndexId), ScanCursor>>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        CursorRegistry::default()
    }

    /// Opens (or re-opens, discarding any prior position) a cursor over
    /// `ordered_row_ids` for `(tx_id, index_id)`.
    pub fn open(&self, tx_id: Uuid, index_id: IndexId, ordered_row_ids: Vec<RowId>) {
        self.cursors.lock().insert(
            (tx_id, index_id),
            ScanCursor {
                remaining: ordered_row_ids,
                position: 0,
            },
        );
    }

    /// Returns the next batch of up to `batch_size` row ids, and whether
    /// the cursor is now exhausted. Returns `None` if no such cursor is
    /// open (the caller should treat this as "nothing to retrieve").
    pub fn retrieve_batch(&self, tx_id: Uuid, index_id: IndexId, batch_size: usize) -> Option<(Vec<RowId>, bool)> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.get_mut(&(tx_id, index_id))?;
        let batch = cursor.next_batch(batch_size);
        let exhausted = cursor.is_exhausted();
        if exhausted {
            cursors.remove(&(tx_id, index_id));
        }
        Some((batch, exhausted))
    }

    /// Closes every cursor opened by `tx_id`, regardless of index.
    pub fn close_all(&self, tx_id: Uuid) {
        self.cursors.lock().retain(|(cursor_tx, _), _| *cursor_tx != tx_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cursors.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_primitives::PartitionId;

    fn row(n: u128) -> RowId {
        RowId::new(PartitionId(0), Uuid::from_u128(n))
    }

    #[test]
    fn retrieve_batch_paginates_and_closes_on_exhaustion() {
        let registry = CursorRegistry::new();
        let tx = Uuid::from_u128(1);
        let idx = IndexId(1);
        registry.open(tx, idx, vec![row(1), row(2), row(3)]);

        let (batch1, exhausted1) = registry.retrieve_batch(tx, idx, 2).unwrap();
        assert_eq!(batch1, vec![row(1), row(2)]);
        assert!(!exhausted1);
        assert_eq!(registry.len(), 1);

        let (batch2, exhausted2) = registry.retrieve_batch(tx, idx, 2).unwrap();
        assert_eq!(batch2, vec![row(3)]);
        assert!(exhausted2);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn close_all_removes_every_cursor_of_a_tx() {
        let registry = CursorRegistry::new();
        let tx = Uuid::from_u128(1);
        registry.open(tx, IndexId(1), vec![row(1)]);
        registry.open(tx, IndexId(2), vec![row(2)]);
        registry.close_all(tx);
        assert_eq!(registry.len(), 0);
    }
}
