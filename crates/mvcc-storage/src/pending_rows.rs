use std::collections::HashSet;

use engine_primitives::RowId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

/// A volatile, thread-safe `txId -> set(RowId)` map the replica uses to know
/// which rows to resolve on commit/abort cleanup (spec §3, "PendingRows").
///
/// It is explicitly allowed to be empty after a restart: recovery relies on
/// other readers running speculative cleanup against orphaned intents (spec
/// §9, "Volatile pending-rows lost on restart").
#[derive(Default)]
pub struct PendingRows {
    inner: Mutex<FxHashMap<Uuid, HashSet<RowId>>>,
}

impl PendingRows {
    pub fn new() -> Self {
        PendingRows::default()
    }

    /// Records that `tx_id` has a pending write (or a reader-observed
    /// intent) at `row_id`. Compute-if-absent: repeated calls for the same
    /// `(tx_id, row_id)` are idempotent.
    pub fn track(&self, tx_id: Uuid, row_id: RowId) {
        self.inner.lock().entry(tx_id).or_default().insert(row_id);
    }

    pub fn track_many(&self, tx_id: Uuid, row_ids: impl IntoIterator<Item = RowId>) {
        let mut guard = self.inner.lock();
        let set = guard.entry(tx_id).or_default();
        set.extend(row_ids);
    }

    /// Removes and returns every row id tracked for `tx_id`, for cleanup.
    /// Idempotent: a second call for the same `tx_id` returns an empty set.
    pub fn take(&self, tx_id: Uuid) -> HashSet<RowId> {
        self.inner.lock().remove(&tx_id).unwrap_or_default()
    }

    pub fn contains(&self, tx_id: Uuid, row_id: &RowId) -> bool {
        self.inner
            .lock()
            .get(&tx_id)
            .map(|set| set.contains(row_id))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn len(&self, tx_id: Uuid) -> usize {
        self.inner.lock().get(&tx_id).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_primitives::PartitionId;

    #[test]
    fn track_is_idempotent() {
        let pending = PendingRows::new();
        let tx = Uuid::from_u128(1);
        let row = RowId::new(PartitionId(0), Uuid::from_u128(1));
        pending.track(tx, row);
        pending.track(tx, row);
        assert_eq!(pending.len(tx), 1);
    }

    #[test]
    fn take_is_idempotent_after_first_call() {
        let pending = PendingRows::new();
        let tx = Uuid::from_u128(1);
        let row = RowId::new(PartitionId(0), Uuid::from_u128(1));
        pending.track(tx, row);
        let first = pending.take(tx);
        assert_eq!(first.len(), 1);
        let second = pending.take(tx);
        assert!(second.is_empty());
    }
}
