use async_trait::async_trait;
use engine_primitives::TablePartitionId;
use replication_api::TxCleanupReplicaRequest;

use crate::error::ReplicaError;

/// Delivers a `TX_CLEANUP` request to a transaction's other enlisted
/// partitions (spec §4.3, `processTxFinishAction` step 4: "for each enlisted
/// partition, issue cleanup with retry"). Inter-replica RPC framing is out
/// of scope (spec §1); this is the one seam `processTxFinishAction` needs
/// into it, alongside the local shortcut when the target group is this
/// listener's own.
#[async_trait]
pub trait PartitionCleanupDispatcher: Send + Sync {
    async fn dispatch_cleanup(&self, group: TablePartitionId, request: TxCleanupReplicaRequest) -> Result<(), ReplicaError>;
}
