use thiserror::Error;

/// Errors surfaced by the external replicated-log / placement-driver /
/// coordination-store collaborators. These are the infrastructure-level
/// failures `partition-replica::ReplicaError` wraps and maps onto the
/// wire-observable error codes of spec §6.
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("replica unavailable")]
    ReplicaUnavailable,
    #[error("not the primary replica for this group")]
    PrimaryReplicaMiss,
    #[error("replication timed out")]
    ReplicationTimeout,
    #[error("coordination store write rejected: revision changed concurrently")]
    ConcurrentModification,
    #[error("replication error: {0}")]
    Other(String),
}
