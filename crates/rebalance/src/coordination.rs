use std::collections::BTreeSet;
use std::sync::Arc;

use engine_primitives::{PartitionId, TableId};
use replication_api::{assignment_key, Assignment, AssignmentKind, CoordinationStore, KeyCondition, KeyOp};

use crate::derive::RebalanceOutcome;
use crate::error::RebalanceError;
use crate::state::{AssignmentSnapshot, Versioned};

fn decode(bytes: &[u8], key: &str) -> Result<BTreeSet<Assignment>, RebalanceError> {
    serde_json::from_slice(bytes).map_err(|_| RebalanceError::Corrupt(key.to_string()))
}

fn encode(assignments: &BTreeSet<Assignment>) -> Vec<u8> {
    serde_json::to_vec(assignments).expect("BTreeSet<Assignment> is always serializable")
}

/// Reads and writes the five `assignments.*` coordination keys of one
/// partition group (spec §6).
pub struct AssignmentStore {
    store: Arc<dyn CoordinationStore>,
    table_id: TableId,
    partition_id: PartitionId,
}

impl AssignmentStore {
    pub fn new(store: Arc<dyn CoordinationStore>, table_id: TableId, partition_id: PartitionId) -> Self {
        AssignmentStore { store, table_id, partition_id }
    }

    fn key(&self, kind: AssignmentKind) -> String {
        assignment_key(kind, self.table_id, self.partition_id)
    }

    async fn read_set(&self, kind: AssignmentKind) -> Result<Versioned<BTreeSet<Assignment>>, RebalanceError> {
        let key = self.key(kind);
        match self.store.get(&key).await {
            Some((bytes, revision)) => Ok(Versioned {
                value: decode(&bytes, &key)?,
                revision: Some(revision),
            }),
            None => Ok(Versioned {
                value: BTreeSet::new(),
                revision: None,
            }),
        }
    }

    pub async fn read_pending(&self) -> Result<Versioned<BTreeSet<Assignment>>, RebalanceError> {
        self.read_set(AssignmentKind::Pending).await
    }

    /// Reads all five keys as one snapshot (spec §4.4 step 1).
    pub async fn read_snapshot(&self) -> Result<AssignmentSnapshot, RebalanceError> {
        let stable = self.read_set(AssignmentKind::Stable).await?;
        let pending = self.read_set(AssignmentKind::Pending).await?;
        let switch_reduce = self.read_set(AssignmentKind::SwitchReduce).await?;
        let switch_append = self.read_set(AssignmentKind::SwitchAppend).await?;
        let planned_key = self.key(AssignmentKind::Planned);
        let planned = match self.store.get(&planned_key).await {
            Some((bytes, revision)) => Versioned {
                value: Some(decode(&bytes, &planned_key)?),
                revision: Some(revision),
            },
            None => Versioned { value: None, revision: None },
        };
        Ok(AssignmentSnapshot {
            stable,
            pending,
            planned,
            switch_reduce,
            switch_append,
        })
    }

    fn put(&self, conditions: &mut Vec<KeyCondition>, ops: &mut Vec<KeyOp>, kind: AssignmentKind, expected_revision: Option<u64>, value: &BTreeSet<Assignment>) {
        let key = self.key(kind);
        conditions.push(KeyCondition { key: key.clone(), expected_revision });
        ops.push(KeyOp::Put { key, value: encode(value) });
    }

    fn delete_if_present(&self, conditions: &mut Vec<KeyCondition>, ops: &mut Vec<KeyOp>, kind: AssignmentKind, expected_revision: Option<u64>) {
        if let Some(revision) = expected_revision {
            let key = self.key(kind);
            conditions.push(KeyCondition { key: key.clone(), expected_revision: Some(revision) });
            ops.push(KeyOp::Delete { key });
        }
    }

    /// Writes one rebalance round's branch as a single atomic transaction,
    /// guarded by every touched key's revision at once (spec §4.4 step 3:
    /// "guard the update with compound revision-equality conditions on each
    /// of the five keys"). Either every op in the branch lands, or none do —
    /// `compare_and_set`/`compare_and_delete` issued back-to-back cannot
    /// make that guarantee, since a later one can fail after an earlier one
    /// already landed.
    pub async fn apply_outcome(&self, snapshot: &AssignmentSnapshot, outcome: &RebalanceOutcome) -> Result<(), RebalanceError> {
        let mut conditions = Vec::new();
        let mut ops = Vec::new();
        match outcome {
            RebalanceOutcome::SwitchAppend { pending, switch_reduce, switch_append } | RebalanceOutcome::SwitchReduce { pending, switch_reduce, switch_append } => {
                self.put(&mut conditions, &mut ops, AssignmentKind::Pending, snapshot.pending.revision, pending);
                self.put(&mut conditions, &mut ops, AssignmentKind::SwitchReduce, snapshot.switch_reduce.revision, switch_reduce);
                self.put(&mut conditions, &mut ops, AssignmentKind::SwitchAppend, snapshot.switch_append.revision, switch_append);
            }
            RebalanceOutcome::SchedulePendingRebalance { stable, pending } => {
                self.put(&mut conditions, &mut ops, AssignmentKind::Stable, snapshot.stable.revision, stable);
                self.put(&mut conditions, &mut ops, AssignmentKind::Pending, snapshot.pending.revision, pending);
                self.delete_if_present(&mut conditions, &mut ops, AssignmentKind::Planned, snapshot.planned.revision);
            }
            RebalanceOutcome::FinishRebalance { stable } => {
                self.put(&mut conditions, &mut ops, AssignmentKind::Stable, snapshot.stable.revision, stable);
                self.delete_if_present(&mut conditions, &mut ops, AssignmentKind::Pending, snapshot.pending.revision);
            }
        }
        self.store.invoke(&conditions, &ops).await?;
        Ok(())
    }
}
