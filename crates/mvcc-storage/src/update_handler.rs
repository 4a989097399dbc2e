use std::collections::BTreeMap;
use std::sync::Arc;

use engine_primitives::{BinaryRow, RowId, TablePartitionId, Timestamp};
use tracing::trace;
use uuid::Uuid;

use crate::error::StorageError;
use crate::pending_rows::PendingRows;
use crate::storage::{HeadSnapshot, PartitionStorage};

/// Applies row-level writes to [`PartitionStorage`] and tracks the pending
/// write intents of in-flight transactions so they can be resolved on
/// commit/abort. This is the concrete "Storage update handler" of spec
/// §4.2.
pub struct StorageUpdateHandler {
    storage: Arc<dyn PartitionStorage>,
    pending_rows: PendingRows,
}

impl StorageUpdateHandler {
    pub fn new(storage: Arc<dyn PartitionStorage>) -> Self {
        StorageUpdateHandler {
            storage,
            pending_rows: PendingRows::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn PartitionStorage> {
        &self.storage
    }

    pub fn pending_rows(&self) -> &PendingRows {
        &self.pending_rows
    }

    /// Single-row upsert/delete (spec §4.2, `handleUpdate`).
    ///
    /// If `commit_ts` is set, writes a committed version directly (the 1PC
    /// path); otherwise writes a write intent of `tx_id`, first running
    /// speculative cleanup against any stale intent left by another
    /// transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_update(
        &self,
        tx_id: Uuid,
        row_id: RowId,
        commit_partition: TablePartitionId,
        row: Option<BinaryRow>,
        track_intent: bool,
        commit_ts: Option<Timestamp>,
        last_commit_ts: Option<Timestamp>,
    ) -> Result<(), StorageError> {
        if let Some(commit_ts) = commit_ts {
            self.storage.add_committed_write(row_id, commit_ts, row);
            return Ok(());
        }

        self.perform_storage_cleanup_if_needed(tx_id, row_id, last_commit_ts)?;
        self.storage.add_write_intent(row_id, tx_id, commit_partition, row);
        if track_intent {
            self.pending_rows.track(tx_id, row_id);
        }
        Ok(())
    }

    /// Multi-row upsert/delete (spec §4.2, `handleUpdateAll`). The map is
    /// iterated in `RowId` order — which, within one partition, coincides
    /// with natural `Uuid` order — giving the same lock/apply ordering the
    /// lock manager already committed to for multi-row acquisitions.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_update_all(
        &self,
        tx_id: Uuid,
        rows: BTreeMap<RowId, Option<BinaryRow>>,
        commit_partition: TablePartitionId,
        track_intent: bool,
        commit_ts: Option<Timestamp>,
        last_commit_ts: &BTreeMap<RowId, Timestamp>,
    ) -> Result<(), StorageError> {
        for (row_id, row) in rows {
            let last_commit_ts = last_commit_ts.get(&row_id).copied();
            self.handle_update(tx_id, row_id, commit_partition, row, track_intent, commit_ts, last_commit_ts)?;
        }
        Ok(())
    }

    /// Records that a reader observed a write intent of `tx_id` at
    /// `row_id`, so that once the transaction's outcome is known, cleanup
    /// can resolve this row even on a replica that never itself wrote it
    /// (spec §4.2, `handleWriteIntentRead`).
    pub fn handle_write_intent_read(&self, tx_id: Uuid, row_id: RowId) {
        self.pending_rows.track(tx_id, row_id);
    }

    /// Resolves every row tracked for `tx_id`: commits each write intent at
    /// `commit_ts` if `commit` is true, else aborts it (spec §4.2,
    /// `handleTransactionCleanup`). Idempotent: a row with no intent left to
    /// resolve (already cleaned up) is silently skipped rather than treated
    /// as an error, since cleanup may be retried or run concurrently from
    /// multiple triggers (a direct `TX_CLEANUP` request and a reader's
    /// speculative cleanup).
    pub fn handle_transaction_cleanup(&self, tx_id: Uuid, commit: bool, commit_ts: Option<Timestamp>) {
        let row_ids = self.pending_rows.take(tx_id);
        for row_id in row_ids {
            let result = if commit {
                let commit_ts = commit_ts.expect("commit cleanup must carry a commit timestamp");
                self.storage.commit_write(row_id, commit_ts)
            } else {
                self.storage.abort_write(row_id)
            };
            if let Err(err) = result {
                trace!(%row_id, %tx_id, %err, "cleanup found no intent to resolve, already resolved");
            }
        }
    }

    /// Speculative cleanup (spec §4.2): before writing a new intent for
    /// `row_id`, check whether the current head is a stale intent left by a
    /// *different* transaction, and if so finalize it using the four-way
    /// comparison against `last_commit_ts` (the most recent known commit for
    /// this row, as seen by the primary issuing this command).
    fn perform_storage_cleanup_if_needed(
        &self,
        tx_id: Uuid,
        row_id: RowId,
        last_commit_ts: Option<Timestamp>,
    ) -> Result<(), StorageError> {
        let head = self.storage.peek_head(row_id);
        let HeadSnapshot::Intent {
            tx_id: other_tx,
            newest_committed_ts,
            ..
        } = head
        else {
            return Ok(());
        };
        if other_tx == tx_id {
            // Re-write under the same transaction: not stale, nothing to do.
            return Ok(());
        }
        let Some(last_commit_ts) = last_commit_ts else {
            // No information to resolve the stale intent with; leave it for
            // a subsequent reader/writer with fresher information.
            return Ok(());
        };

        match newest_committed_ts {
            None => {
                // The intent is the first write ever made to this row:
                // commit it at the last known commit time.
                self.storage.commit_write(row_id, last_commit_ts)
            }
            Some(next_commit_ts) if next_commit_ts < last_commit_ts => self.storage.commit_write(row_id, last_commit_ts),
            Some(next_commit_ts) if next_commit_ts == last_commit_ts => self.storage.abort_write(row_id),
            Some(next_commit_ts) => Err(StorageError::StaleCommitAssertion {
                row_id,
                next_commit_ts: format!("{next_commit_ts}"),
                last_commit_ts: format!("{last_commit_ts}"),
            }),
        }
    }
}
