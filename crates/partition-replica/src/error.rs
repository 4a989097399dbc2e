use engine_primitives::TableId;
use lock_manager::LockError;
use mvcc_storage::StorageError;
use rebalance::RebalanceError;
use replication_api::ReplicationError;
use schema_compat::SchemaCompatError;
use thiserror::Error;
use tx_state::TxStateError;
use uuid::Uuid;

/// The wire-observable error codes of spec §6/§7. [`ReplicaError::to_error_code`]
/// is the one place that maps the richer internal error taxonomy onto this
/// small closed set, the boundary a client-facing RPC layer would serialize.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    ReplicaUnavailable,
    PrimaryReplicaMiss,
    ReplicationTimeout,
    ReplicaCommon,
    TxFailedReadWriteOperation,
    TxAbandoned,
    TxIncompatibleSchema,
    StorageRebalanceInProgress,
}

/// Every error a [`crate::listener::ReplicaListener`] can surface, aggregating
/// each collaborator crate's own error type (spec's AMBIENT error-handling
/// note: "partition-replica aggregates them into a single ReplicaError").
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("not the primary replica for this group")]
    PrimaryReplicaMiss,

    #[error("replica unavailable")]
    ReplicaUnavailable,

    #[error("replication timed out")]
    ReplicationTimeout,

    #[error("transaction {0} was abandoned (its coordinator was lost)")]
    TxAbandoned(Uuid),

    #[error("Failed to enlist read-write operation into read-only transaction")]
    ReadWriteIntoReadOnly,

    #[error("Commit failed because schema {table_id} is not forward-compatible with the version at commit time")]
    CommitSchemaIncompatible { table_id: TableId },

    #[error("a rebalance is in progress for this partition group")]
    RebalanceInProgress,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    TxState(#[from] TxStateError),

    #[error(transparent)]
    SchemaCompat(#[from] SchemaCompatError),

    #[error(transparent)]
    Rebalance(#[from] RebalanceError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

impl ReplicaError {
    /// Maps this error onto the wire-observable code a client would see
    /// (spec §6, "Error codes").
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            ReplicaError::PrimaryReplicaMiss => ErrorCode::PrimaryReplicaMiss,
            ReplicaError::ReplicaUnavailable => ErrorCode::ReplicaUnavailable,
            ReplicaError::ReplicationTimeout => ErrorCode::ReplicationTimeout,
            ReplicaError::TxAbandoned(_) => ErrorCode::TxAbandoned,
            ReplicaError::ReadWriteIntoReadOnly => ErrorCode::TxFailedReadWriteOperation,
            ReplicaError::CommitSchemaIncompatible { .. } => ErrorCode::TxIncompatibleSchema,
            ReplicaError::SchemaCompat(_) => ErrorCode::TxIncompatibleSchema,
            ReplicaError::RebalanceInProgress => ErrorCode::StorageRebalanceInProgress,
            ReplicaError::Replication(ReplicationError::ReplicaUnavailable) => ErrorCode::ReplicaUnavailable,
            ReplicaError::Replication(ReplicationError::PrimaryReplicaMiss) => ErrorCode::PrimaryReplicaMiss,
            ReplicaError::Replication(ReplicationError::ReplicationTimeout) => ErrorCode::ReplicationTimeout,
            ReplicaError::Replication(_) => ErrorCode::ReplicaCommon,
            ReplicaError::Lock(_) | ReplicaError::Storage(_) | ReplicaError::TxState(_) | ReplicaError::Rebalance(_) => {
                ErrorCode::ReplicaCommon
            }
        }
    }

    /// `true` if this error is retryable by the caller as-is (spec §7,
    /// taxonomy class (a)), as opposed to fatal to the transaction or the
    /// partition.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.to_error_code(),
            ErrorCode::ReplicaUnavailable | ErrorCode::PrimaryReplicaMiss | ErrorCode::ReplicationTimeout
        )
    }
}
