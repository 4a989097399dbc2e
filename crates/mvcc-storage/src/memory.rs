use std::sync::atomic::{AtomicUsize, Ordering};

use engine_primitives::{BinaryRow, RowId, TablePartitionId, Timestamp};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::chain::{IntentVersion, ReadResult, VersionChain};
use crate::error::StorageError;
use crate::storage::{HeadSnapshot, PartitionStorage};

/// An in-memory reference implementation of [`PartitionStorage`], the
/// direct analogue of the teacher's `HashMapObjectDB`: one `Mutex`-guarded
/// [`VersionChain`] per row, held in a sharded map so unrelated rows never
/// contend on the same lock.
pub struct InMemoryPartitionStorage {
    shards: Vec<Mutex<FxHashMap<RowId, VersionChain>>>,
    gc_cursor: AtomicUsize,
}

const SHARD_COUNT: usize = 64;

impl Default for InMemoryPartitionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPartitionStorage {
    pub fn new() -> Self {
        InMemoryPartitionStorage {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(FxHashMap::default())).collect(),
            gc_cursor: AtomicUsize::new(0),
        }
    }

    fn shard_index(row_id: &RowId) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        row_id.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    fn shard(&self, row_id: &RowId) -> &Mutex<FxHashMap<RowId, VersionChain>> {
        &self.shards[Self::shard_index(row_id)]
    }
}

impl PartitionStorage for InMemoryPartitionStorage {
    fn read(&self, row_id: RowId, read_ts: Timestamp) -> ReadResult {
        let shard = self.shard(&row_id).lock();
        match shard.get(&row_id) {
            Some(chain) => chain.read_at(read_ts),
            None => ReadResult::empty(),
        }
    }

    fn read_committed(&self, row_id: RowId, read_ts: Timestamp) -> ReadResult {
        let shard = self.shard(&row_id).lock();
        match shard.get(&row_id) {
            Some(chain) => chain.committed_at(read_ts),
            None => ReadResult::empty(),
        }
    }

    fn peek_head(&self, row_id: RowId) -> HeadSnapshot {
        let shard = self.shard(&row_id).lock();
        match shard.get(&row_id) {
            Some(chain) => match &chain.intent {
                Some(intent) => HeadSnapshot::Intent {
                    tx_id: intent.tx_id,
                    commit_partition: intent.commit_partition,
                    newest_committed_ts: chain.newest_committed_ts(),
                },
                None => HeadSnapshot::NoIntent {
                    newest_committed_ts: chain.newest_committed_ts(),
                },
            },
            None => HeadSnapshot::NoIntent {
                newest_committed_ts: None,
            },
        }
    }

    fn add_write_intent(&self, row_id: RowId, tx_id: Uuid, commit_partition: TablePartitionId, row: Option<BinaryRow>) {
        let mut shard = self.shard(&row_id).lock();
        let chain = shard.entry(row_id).or_insert_with(VersionChain::new);
        chain.intent = Some(IntentVersion {
            tx_id,
            commit_partition,
            row,
        });
    }

    fn add_committed_write(&self, row_id: RowId, commit_ts: Timestamp, row: Option<BinaryRow>) {
        let mut shard = self.shard(&row_id).lock();
        let chain = shard.entry(row_id).or_insert_with(VersionChain::new);
        chain.push_committed(commit_ts, row);
    }

    fn commit_write(&self, row_id: RowId, commit_ts: Timestamp) -> Result<(), StorageError> {
        let mut shard = self.shard(&row_id).lock();
        let chain = shard.get_mut(&row_id).ok_or(StorageError::NoIntentToResolve(row_id))?;
        let intent = chain.intent.take().ok_or(StorageError::NoIntentToResolve(row_id))?;
        chain.push_committed(commit_ts, intent.row);
        Ok(())
    }

    fn abort_write(&self, row_id: RowId) -> Result<(), StorageError> {
        let mut shard = self.shard(&row_id).lock();
        let chain = shard.get_mut(&row_id).ok_or(StorageError::NoIntentToResolve(row_id))?;
        if chain.intent.take().is_none() {
            return Err(StorageError::NoIntentToResolve(row_id));
        }
        if chain.is_empty_chain() {
            shard.remove(&row_id);
        }
        Ok(())
    }

    fn row_ids(&self) -> Vec<RowId> {
        self.shards.iter().flat_map(|s| s.lock().keys().copied().collect::<Vec<_>>()).collect()
    }

    fn gc_pass(&self, low_watermark: Timestamp, batch_size: usize) -> usize {
        let all_ids = self.row_ids();
        if all_ids.is_empty() {
            return 0;
        }
        let start = self.gc_cursor.load(Ordering::Relaxed) % all_ids.len();
        let n = batch_size.min(all_ids.len());
        for i in 0..n {
            let row_id = all_ids[(start + i) % all_ids.len()];
            let mut shard = self.shard(&row_id).lock();
            if let Some(chain) = shard.get_mut(&row_id) {
                gc_chain(chain, low_watermark);
                if chain.is_empty_chain() {
                    shard.remove(&row_id);
                }
            }
        }
        self.gc_cursor.store((start + n) % all_ids.len(), Ordering::Relaxed);
        n
    }
}

/// Removes committed versions strictly older than the newest committed
/// version that is itself `<= low_watermark` — that boundary version is the
/// oldest version any reader at or above the low-watermark could possibly
/// still need, so everything behind it is safe to drop (spec §8, "Low-
/// watermark GC correctness").
fn gc_chain(chain: &mut VersionChain, low_watermark: Timestamp) {
    let boundary = chain.committed.iter().position(|v| v.commit_ts <= low_watermark);
    if let Some(idx) = boundary {
        chain.committed.truncate(idx + 1);
    }
}
