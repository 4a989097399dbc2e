use async_trait::async_trait;
use engine_primitives::{TablePartitionId, Timestamp};
use uuid::Uuid;

use crate::error::TxStateError;
use crate::meta::TransactionMeta;

/// Resolves a transaction's outcome by asking its commit partition (spec
/// §4.3, write-intent resolution step 3: "ask transaction-state-resolver for
/// (intent.txId, intent.commitPartition, readTs)").
///
/// `read_ts` is accepted for parity with the source algorithm and because a
/// remote implementation may use it to decide whether it is even worth
/// contacting the commit partition (e.g. skip the call if a cached terminal
/// state is already known locally); the in-memory resolver in this crate
/// ignores it, since it always has the authoritative state.
#[async_trait]
pub trait TransactionStateResolver: Send + Sync {
    async fn resolve(
        &self,
        tx_id: Uuid,
        commit_partition: TablePartitionId,
        read_ts: Timestamp,
    ) -> Result<TransactionMeta, TxStateError>;
}
