use engine_primitives::Timestamp;
use tracing::{debug, trace};
use tx_state::{TransactionStateResolver, TxState};

use crate::storage::HeadSnapshot;
use crate::update_handler::StorageUpdateHandler;

/// Crash recovery (spec §4.2 SUPPLEMENT, §9 "Volatile pending-rows lost on
/// restart"): on datastore startup, the in-memory [`crate::pending_rows::PendingRows`]
/// tracking which rows a transaction wrote is gone, so this replica can no
/// longer drive cleanup directly from that map. Instead, every row whose
/// version chain head is still a write intent is resolved the same way a
/// reader's speculative cleanup would — by asking the write's commit
/// partition for the transaction's outcome — without depending on anything
/// that did not survive the restart. Returns the number of orphaned intents
/// resolved.
pub async fn recover_orphan_intents(handler: &StorageUpdateHandler, resolver: &dyn TransactionStateResolver, now: Timestamp) -> usize {
    let mut resolved = 0;
    for row_id in handler.storage().row_ids() {
        let HeadSnapshot::Intent { tx_id, commit_partition, .. } = handler.storage().peek_head(row_id) else {
            continue;
        };

        match resolver.resolve(tx_id, commit_partition, now).await {
            Ok(meta) => match meta.state {
                TxState::Committed => {
                    let commit_ts = meta.commit_ts.expect("a committed TransactionMeta always carries a commit_ts");
                    if handler.storage().commit_write(row_id, commit_ts).is_ok() {
                        resolved += 1;
                    }
                }
                TxState::Aborted | TxState::Abandoned => {
                    if handler.storage().abort_write(row_id).is_ok() {
                        resolved += 1;
                    }
                }
                TxState::Pending => {
                    trace!(%row_id, %tx_id, "orphan intent still pending on its commit partition, left for a later reader");
                }
            },
            Err(err) => {
                trace!(%row_id, %tx_id, %err, "commit partition has no record of this transaction yet, left for a later reader");
            }
        }
    }
    if resolved > 0 {
        debug!(resolved, "recovered orphaned write intents on startup");
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ReadResultKind;
    use crate::memory::InMemoryPartitionStorage;
    use async_trait::async_trait;
    use engine_primitives::{BinaryRow, PartitionId, RowId, TableId, TablePartitionId};
    use std::sync::Arc;
    use tx_state::{TransactionMeta, TxStateError};
    use uuid::Uuid;

    fn ts(p: u64) -> Timestamp {
        Timestamp::new(p, 0, 1)
    }

    fn row_id(n: u128) -> RowId {
        RowId::new(PartitionId(0), Uuid::from_u128(n))
    }

    fn cp() -> TablePartitionId {
        TablePartitionId::new(TableId(1), PartitionId(0))
    }

    struct FixedResolver(TransactionMeta);

    #[async_trait]
    impl TransactionStateResolver for FixedResolver {
        async fn resolve(&self, _tx_id: Uuid, _commit_partition: TablePartitionId, _read_ts: Timestamp) -> Result<TransactionMeta, TxStateError> {
            Ok(self.0.clone())
        }
    }

    struct UnknownResolver;

    #[async_trait]
    impl TransactionStateResolver for UnknownResolver {
        async fn resolve(&self, tx_id: Uuid, _commit_partition: TablePartitionId, _read_ts: Timestamp) -> Result<TransactionMeta, TxStateError> {
            Err(TxStateError::Unknown(tx_id))
        }
    }

    #[tokio::test]
    async fn recovers_a_committed_orphan_intent() {
        let handler = StorageUpdateHandler::new(Arc::new(InMemoryPartitionStorage::new()));
        let tx = Uuid::from_u128(1);
        let r = row_id(1);
        handler.handle_update(tx, r, cp(), Some(BinaryRow::new(1, vec![1])), true, None, None).unwrap();

        let resolver = FixedResolver(TransactionMeta::committed("node-1", ts(7)));
        let count = recover_orphan_intents(&handler, &resolver, ts(100)).await;
        assert_eq!(count, 1);

        let result = handler.storage().read(r, ts(100));
        assert_eq!(result.kind, ReadResultKind::Committed);
        assert_eq!(result.commit_ts, Some(ts(7)));
    }

    #[tokio::test]
    async fn recovers_an_aborted_orphan_intent() {
        let handler = StorageUpdateHandler::new(Arc::new(InMemoryPartitionStorage::new()));
        let tx = Uuid::from_u128(2);
        let r = row_id(2);
        handler.handle_update(tx, r, cp(), Some(BinaryRow::new(1, vec![2])), true, None, None).unwrap();

        let resolver = FixedResolver(TransactionMeta::aborted("node-1"));
        let count = recover_orphan_intents(&handler, &resolver, ts(100)).await;
        assert_eq!(count, 1);
        assert_eq!(handler.storage().read(r, ts(100)).kind, ReadResultKind::Empty);
    }

    #[tokio::test]
    async fn leaves_intents_whose_outcome_is_unknown() {
        let handler = StorageUpdateHandler::new(Arc::new(InMemoryPartitionStorage::new()));
        let tx = Uuid::from_u128(3);
        let r = row_id(3);
        handler.handle_update(tx, r, cp(), Some(BinaryRow::new(1, vec![3])), true, None, None).unwrap();

        let count = recover_orphan_intents(&handler, &UnknownResolver, ts(100)).await;
        assert_eq!(count, 0);
        assert_eq!(handler.storage().read(r, ts(100)).kind, ReadResultKind::WriteIntent);
    }

    #[tokio::test]
    async fn rows_with_no_intent_are_skipped() {
        let handler = StorageUpdateHandler::new(Arc::new(InMemoryPartitionStorage::new()));
        handler.storage().add_committed_write(row_id(4), ts(5), Some(BinaryRow::new(1, vec![4])));

        let resolver = FixedResolver(TransactionMeta::committed("node-1", ts(7)));
        let count = recover_orphan_intents(&handler, &resolver, ts(100)).await;
        assert_eq!(count, 0);
    }
}
