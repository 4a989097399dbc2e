use std::collections::BTreeMap;

use engine_primitives::{BinaryRow, IndexId, RowId, TablePartitionId, Timestamp};
use schema_compat::CatalogVersion;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The replicated-log command set (spec §6). These are the values appended
/// through [`crate::external::ReplicatedLogClient::append`]; every replica
/// of a group applies them in the same order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    Update(UpdateCommand),
    UpdateAll(UpdateAllCommand),
    FinishTx(FinishTxCommand),
    TxCleanup(TxCleanupCommand),
    SafeTimeSync(SafeTimeSyncCommand),
    BuildIndex(BuildIndexCommand),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateCommand {
    pub table_partition_id: TablePartitionId,
    pub row_uuid: Uuid,
    pub row_message: Option<BinaryRow>,
    pub tx_id: Uuid,
    pub safe_time: Timestamp,
    pub full: bool,
    pub last_commit_timestamp: Option<Timestamp>,
    pub required_catalog_version: CatalogVersion,
    pub tx_coordinator_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateAllCommand {
    pub table_partition_id: TablePartitionId,
    pub rows_to_update: BTreeMap<Uuid, Option<BinaryRow>>,
    pub last_commit_timestamps: BTreeMap<Uuid, Timestamp>,
    pub tx_id: Uuid,
    pub safe_time: Timestamp,
    pub full: bool,
    pub required_catalog_version: CatalogVersion,
    pub tx_coordinator_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinishTxCommand {
    pub tx_id: Uuid,
    pub commit: bool,
    pub commit_timestamp: Option<Timestamp>,
    pub table_partition_ids: Vec<TablePartitionId>,
    pub safe_time: Timestamp,
    pub required_catalog_version: CatalogVersion,
    pub tx_coordinator_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxCleanupCommand {
    pub tx_id: Uuid,
    pub commit: bool,
    pub commit_timestamp: Option<Timestamp>,
    pub safe_time: Timestamp,
    pub required_catalog_version: CatalogVersion,
    pub tx_coordinator_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafeTimeSyncCommand {
    pub safe_time: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildIndexCommand {
    pub index_id: IndexId,
    pub row_ids: Vec<RowId>,
    pub finish: bool,
}
