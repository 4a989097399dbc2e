use std::collections::BTreeSet;

use async_trait::async_trait;
use engine_primitives::{TablePartitionId, Timestamp};
use schema_compat::CatalogVersion;
use tokio::sync::broadcast;

use crate::assignment::Assignment;
use crate::command::Command;
use crate::error::ReplicationError;
use crate::request::PrimaryReplicaMeta;

/// Leader/configuration lifecycle events the rebalance events listener
/// reacts to (spec §4.4). Delivered over a broadcast channel rather than a
/// registered callback, the idiomatic Rust shape for "subscribe to an
/// external event stream" used throughout this workspace in place of the
/// source's listener-registration style.
#[derive(Clone, Debug)]
pub enum LeaderEvent {
    LeaderElected { group: TablePartitionId },
    ReconfigurationError { group: TablePartitionId, attempt: u32 },
    NewPeersConfigurationApplied { group: TablePartitionId },
}

/// Submits commands to a group's replicated log and delivers them in the
/// same order to every replica (spec §2, "Replicated-log client
/// (external)"). The core depends only on this trait, never a concrete
/// Raft/transport implementation, per spec §1's explicit non-goals.
#[async_trait]
pub trait ReplicatedLogClient: Send + Sync {
    /// Appends `command` to `group`'s log, returning the safe-time the
    /// group reached once the command was durably applied.
    async fn append(&self, group: TablePartitionId, command: Command) -> Result<Timestamp, ReplicationError>;

    /// Subscribes to leader-election and reconfiguration events for groups
    /// this node is a member of.
    fn subscribe_leader_events(&self) -> broadcast::Receiver<LeaderEvent>;

    /// Requests a peers/learners configuration change for `group`. Cluster
    /// membership itself (the Raft-level mechanics) is an explicit non-goal
    /// per spec §1; this is the one seam the rebalance events listener
    /// needs into it.
    async fn change_peers(&self, group: TablePartitionId, peers: BTreeSet<Assignment>) -> Result<(), ReplicationError>;
}

/// Resolves current primary-replica identity and listens for primary-replica
/// expiration (spec §2, "Placement driver client").
#[async_trait]
pub trait PlacementDriverClient: Send + Sync {
    async fn primary_replica_meta(&self, group: TablePartitionId) -> Result<PrimaryReplicaMeta, ReplicationError>;

    /// Subscribes to primary-replica expiration events, identifying the
    /// group whose lease just expired.
    fn subscribe_primary_replica_expired(&self) -> broadcast::Receiver<TablePartitionId>;
}

/// Waits for metadata completeness at a given timestamp and resolves the
/// active catalog version (spec §2, "Catalog/schema sync service
/// (external)"). [`schema_compat::CatalogHistory`] is the richer read seam
/// the validator uses; this trait is the narrower one named directly in
/// spec §2 for components that only need "what version is active now".
#[async_trait]
pub trait CatalogSyncService: Send + Sync {
    async fn wait_for_metadata_completeness(&self, ts: Timestamp) -> CatalogVersion;
}

/// A single-key guard for [`CoordinationStore::invoke`]: the key's current
/// revision must equal `expected_revision` (`None` meaning "key must not
/// exist") for any of the transaction's ops to apply.
#[derive(Clone, Debug)]
pub struct KeyCondition {
    pub key: String,
    pub expected_revision: Option<u64>,
}

/// A single-key write applied by [`CoordinationStore::invoke`] once every
/// condition in the same call holds.
#[derive(Clone, Debug)]
pub enum KeyOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// A byte-array coordination store with optimistic-concurrency writes,
/// keyed by the persisted coordination keys of spec §6 (the
/// `assignments.*` family). Revisions are opaque, comparable-for-equality
/// version stamps; the rebalance events listener reads several keys then
/// performs a compound conditional update across all of them via
/// [`invoke`](Self::invoke).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Returns the current value and revision of `key`, if present.
    async fn get(&self, key: &str) -> Option<(Vec<u8>, u64)>;

    /// Atomically checks every condition in `conditions` against the
    /// store's current revisions and, only if all of them hold, applies
    /// every op in `ops` as a single indivisible write — no op takes effect
    /// unless every condition holds, and no reader ever observes a state
    /// where only some of `ops` landed (spec §4.4 step 3's "guard the
    /// update with compound revision-equality conditions on each of the
    /// five keys"). Returns `Err(ConcurrentModification)` if any condition
    /// fails, with no op applied.
    async fn invoke(&self, conditions: &[KeyCondition], ops: &[KeyOp]) -> Result<(), ReplicationError>;

    /// Writes `new_value` to `key` iff its current revision equals
    /// `expected_revision` (`None` meaning "key must not exist"). A
    /// single-key convenience built on [`invoke`](Self::invoke).
    async fn compare_and_set(&self, key: &str, expected_revision: Option<u64>, new_value: Vec<u8>) -> Result<(), ReplicationError> {
        self.invoke(
            &[KeyCondition { key: key.to_string(), expected_revision }],
            &[KeyOp::Put { key: key.to_string(), value: new_value }],
        )
        .await
    }

    /// Deletes `key` iff its current revision equals `expected_revision`.
    /// A single-key convenience built on [`invoke`](Self::invoke).
    async fn compare_and_delete(&self, key: &str, expected_revision: u64) -> Result<(), ReplicationError> {
        self.invoke(
            &[KeyCondition { key: key.to_string(), expected_revision: Some(expected_revision) }],
            &[KeyOp::Delete { key: key.to_string() }],
        )
        .await
    }
}
