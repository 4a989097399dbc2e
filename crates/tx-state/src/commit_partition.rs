use async_trait::async_trait;
use engine_primitives::{TablePartitionId, Timestamp};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::TxStateError;
use crate::meta::{TransactionMeta, TxState};
use crate::resolver::TransactionStateResolver;

const SHARD_COUNT: usize = 64;

/// The in-memory `txId -> TransactionMeta` store a commit partition owns,
/// the authoritative source [`TransactionStateResolver`] reads from in this
/// workspace (spec §8, "Commit partition authority").
pub struct CommitPartitionTxStates {
    shards: Vec<Mutex<FxHashMap<Uuid, TransactionMeta>>>,
}

impl Default for CommitPartitionTxStates {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitPartitionTxStates {
    pub fn new() -> Self {
        CommitPartitionTxStates {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(FxHashMap::default())).collect(),
        }
    }

    fn shard(&self, tx_id: Uuid) -> &Mutex<FxHashMap<Uuid, TransactionMeta>> {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        tx_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Registers a transaction as pending at its first enlisting write (spec
    /// §3, "TransactionMeta: created at first enlisting write"). A no-op if
    /// already present, so repeated enlisting writes under the same tx don't
    /// clobber a later state.
    pub fn begin(&self, tx_id: Uuid, coordinator_id: impl Into<String>) {
        self.shard(tx_id).lock().entry(tx_id).or_insert_with(|| TransactionMeta::pending(coordinator_id.into()));
    }

    pub fn get(&self, tx_id: Uuid) -> Option<TransactionMeta> {
        self.shard(tx_id).lock().get(&tx_id).cloned()
    }

    /// Finalizes `tx_id` as committed. Idempotent: committing an
    /// already-committed tx at the same `commit_ts` succeeds silently;
    /// transitioning out of any other final state is rejected, since a
    /// finalization must be a one-way door (spec §4.3, "a finalization is
    /// idempotent").
    pub fn commit(&self, tx_id: Uuid, commit_ts: Timestamp) -> Result<(), TxStateError> {
        let mut shard = self.shard(tx_id).lock();
        let entry = shard.entry(tx_id).or_insert_with(|| TransactionMeta::pending(""));
        match entry.state {
            TxState::Pending => {
                let coordinator_id = entry.coordinator_id.clone();
                *entry = TransactionMeta::committed(coordinator_id, commit_ts);
                Ok(())
            }
            TxState::Committed if entry.commit_ts == Some(commit_ts) => Ok(()),
            other => Err(TxStateError::AlreadyFinalized(tx_id, other, TxState::Committed)),
        }
    }

    /// Finalizes `tx_id` as aborted. Idempotent the same way [`Self::commit`]
    /// is.
    pub fn abort(&self, tx_id: Uuid) -> Result<(), TxStateError> {
        let mut shard = self.shard(tx_id).lock();
        let entry = shard.entry(tx_id).or_insert_with(|| TransactionMeta::pending(""));
        match entry.state {
            TxState::Pending => {
                let coordinator_id = entry.coordinator_id.clone();
                *entry = TransactionMeta::aborted(coordinator_id);
                Ok(())
            }
            TxState::Aborted => Ok(()),
            other => Err(TxStateError::AlreadyFinalized(tx_id, other, TxState::Aborted)),
        }
    }

    /// Marks `tx_id` abandoned: its coordinator was lost before an outcome
    /// could be recorded (spec §3). Always succeeds, overriding a `Pending`
    /// state but not another final state.
    pub fn mark_abandoned(&self, tx_id: Uuid) {
        let mut shard = self.shard(tx_id).lock();
        let entry = shard.entry(tx_id).or_insert_with(|| TransactionMeta::pending(""));
        if matches!(entry.state, TxState::Pending) {
            debug!(%tx_id, "coordinator lost, marking transaction abandoned");
            *entry = TransactionMeta::abandoned(entry.coordinator_id.clone());
        }
    }

    /// Removes `tx_id`'s meta once cleanup has completed on every enlisted
    /// partition (spec §3, "retained until cleanup completes").
    pub fn forget(&self, tx_id: Uuid) {
        self.shard(tx_id).lock().remove(&tx_id);
    }
}

#[async_trait]
impl TransactionStateResolver for CommitPartitionTxStates {
    async fn resolve(
        &self,
        tx_id: Uuid,
        _commit_partition: TablePartitionId,
        _read_ts: Timestamp,
    ) -> Result<TransactionMeta, TxStateError> {
        self.get(tx_id).ok_or(TxStateError::Unknown(tx_id))
    }
}
