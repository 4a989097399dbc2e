use engine_primitives::{BinaryRow, IndexId, RowId, TablePartitionId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tx_state::TransactionMeta;

/// Fields common to every read-write request: the enlisting transaction,
/// its enlistment term (consistency token), whether this is a 1PC ("full")
/// write, and the transaction's chosen commit partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxContext {
    pub tx_id: Uuid,
    pub term: i64,
    pub commit_partition: TablePartitionId,
    pub full: bool,
}

/// Read-write request bodies (spec §6, "Read-write single/multi/swap/scan").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ReadWriteRequest {
    Get {
        ctx: TxContext,
        row_id: RowId,
    },
    GetAll {
        ctx: TxContext,
        row_ids: Vec<RowId>,
    },
    Insert {
        ctx: TxContext,
        row_id: RowId,
        row: BinaryRow,
    },
    Upsert {
        ctx: TxContext,
        row_id: RowId,
        row: BinaryRow,
    },
    GetAndUpsert {
        ctx: TxContext,
        row_id: RowId,
        row: BinaryRow,
    },
    ReplaceIfExist {
        ctx: TxContext,
        row_id: RowId,
        row: BinaryRow,
    },
    GetAndReplace {
        ctx: TxContext,
        row_id: RowId,
        row: BinaryRow,
    },
    /// Compare-and-set: replaces only if the current row equals `old_row`.
    Replace {
        ctx: TxContext,
        row_id: RowId,
        old_row: BinaryRow,
        new_row: BinaryRow,
    },
    Delete {
        ctx: TxContext,
        row_id: RowId,
    },
    GetAndDelete {
        ctx: TxContext,
        row_id: RowId,
    },
    /// Conditional delete: only deletes if the current row equals
    /// `expected_row`.
    DeleteExact {
        ctx: TxContext,
        row_id: RowId,
        expected_row: BinaryRow,
    },
    ScanRetrieveBatch {
        ctx: TxContext,
        index_id: IndexId,
        batch_size: u32,
    },
}

/// Read-only request bodies with an explicit transaction read timestamp
/// (spec §6, "Read-only single/multi/scan").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ReadOnlyRequest {
    Get { tx_id: Uuid, row_id: RowId, read_timestamp: Timestamp },
    GetAll { tx_id: Uuid, row_ids: Vec<RowId>, read_timestamp: Timestamp },
    Scan { tx_id: Uuid, index_id: IndexId, read_timestamp: Timestamp },
}

/// Read-only requests with no transaction context, reading at `now()`
/// (spec §6, "Direct read-only single/multi").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DirectReadOnlyRequest {
    Get { row_id: RowId, enlistment_consistency_token: u64 },
    GetAll { row_ids: Vec<RowId>, enlistment_consistency_token: u64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxFinishReplicaRequest {
    pub tx_id: Uuid,
    pub commit: bool,
    pub commit_timestamp: Option<Timestamp>,
    pub groups: Vec<TablePartitionId>,
    pub term: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxCleanupReplicaRequest {
    pub tx_id: Uuid,
    pub commit: bool,
    pub commit_timestamp: Option<Timestamp>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxStateCommitPartitionRequest {
    pub tx_id: Uuid,
}

/// The commit-partition replica's answer to a [`TxStateCommitPartitionRequest`]
/// (spec §4.3 SUPPLEMENT): either redirect the caller to the current primary,
/// or hand back the authoritative transaction meta.
#[derive(Clone, Debug)]
pub enum TxStateCommitPartitionResponse {
    NotPrimary(PrimaryReplicaMeta),
    Meta(TransactionMeta),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaSafeTimeSyncRequest {
    pub safe_time: Timestamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildIndexReplicaRequest {
    pub index_id: IndexId,
    pub row_ids: Vec<RowId>,
    pub finish: bool,
}

/// Identifies the primary replica of a replication group, including the
/// enlistment consistency token clients must echo back on subsequent
/// requests (spec GLOSSARY, "Enlistment consistency token").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrimaryReplicaMeta {
    pub enlistment_consistency_token: u64,
    pub lease_expiration: Timestamp,
}

/// The full request taxonomy for one replication group (spec §6: "Every
/// request carries a replication-group id").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaRequestEnvelope {
    pub group: TablePartitionId,
    pub body: ReplicaRequestBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ReplicaRequestBody {
    ReadWrite(ReadWriteRequest),
    ReadOnly(ReadOnlyRequest),
    DirectReadOnly(DirectReadOnlyRequest),
    TxFinish(TxFinishReplicaRequest),
    TxCleanup(TxCleanupReplicaRequest),
    TxStateCommitPartition(TxStateCommitPartitionRequest),
    SafeTimeSync(ReplicaSafeTimeSyncRequest),
    BuildIndex(BuildIndexReplicaRequest),
}
