use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use engine_primitives::TablePartitionId;
use parking_lot::Mutex;
use replication_api::{Assignment, AssignmentKind, CoordinationStore, ReplicatedLogClient, ReplicationError};
use tracing::{debug, warn};

use crate::coordination::AssignmentStore;
use crate::derive::{derive_next_state, RebalanceOutcome};
use crate::error::RebalanceError;

/// Retries past this many reconfiguration errors keep happening but stop
/// being logged at `warn` level (spec §4.4, "after threshold, keep
/// retrying"). There is intentionally no cancellation mechanism here — see
/// DESIGN.md's record of spec §9's open question.
const LOGGED_RECONFIGURATION_ATTEMPTS: u32 = 10;
const RECONFIGURATION_BACKOFF: Duration = Duration::from_millis(200);

/// Drives the five-key assignment state machine in the coordination
/// metastore on leader election and replicated-log configuration-change
/// events (spec §4.4).
pub struct RebalanceEventsListener {
    log: Arc<dyn ReplicatedLogClient>,
    coordination: Arc<dyn CoordinationStore>,
    reconfiguration_attempts: Mutex<HashMap<TablePartitionId, u32>>,
}

impl RebalanceEventsListener {
    pub fn new(log: Arc<dyn ReplicatedLogClient>, coordination: Arc<dyn CoordinationStore>) -> Self {
        RebalanceEventsListener {
            log,
            coordination,
            reconfiguration_attempts: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self, group: TablePartitionId) -> AssignmentStore {
        AssignmentStore::new(self.coordination.clone(), group.table_id, group.partition_id)
    }

    /// On leader elected: if `pending` names a target peer set, issue a
    /// peers/learners change; reset the reconfiguration retry counter.
    pub async fn on_leader_elected(&self, group: TablePartitionId) -> Result<(), RebalanceError> {
        let pending = self.store(group).read_pending().await?;
        if !pending.value.is_empty() {
            self.log.change_peers(group, pending.value).await?;
        }
        self.reconfiguration_attempts.lock().remove(&group);
        Ok(())
    }

    /// On a reconfiguration error: bump the retry counter and return the
    /// backoff to wait before the caller retries. Never gives up — retries
    /// continue unbounded past the logged threshold, per spec §4.4.
    pub fn on_reconfiguration_error(&self, group: TablePartitionId) -> Duration {
        let mut attempts = self.reconfiguration_attempts.lock();
        let count = attempts.entry(group).or_insert(0);
        *count += 1;
        if *count <= LOGGED_RECONFIGURATION_ATTEMPTS {
            debug!(%group, attempt = *count, "reconfiguration error, retrying");
        } else {
            warn!(%group, attempt = *count, "reconfiguration still failing past the usual retry threshold, retrying anyway");
        }
        RECONFIGURATION_BACKOFF
    }

    /// On new peers applied: atomically reads the five assignment keys,
    /// derives the next branch, and writes it back guarded by the revisions
    /// it read. Recomputes and retries unboundedly on a concurrent write
    /// (spec §4.4 step 5).
    pub async fn do_on_new_peers_configuration_applied(
        &self,
        group: TablePartitionId,
        new_stable: BTreeSet<Assignment>,
    ) -> Result<RebalanceOutcome, RebalanceError> {
        let store = self.store(group);
        loop {
            let snapshot = store.read_snapshot().await?;
            let outcome = derive_next_state(
                &snapshot.stable.value,
                &new_stable,
                &snapshot.switch_reduce.value,
                &snapshot.switch_append.value,
                snapshot.planned.value.as_ref(),
            );
            match store.apply_outcome(&snapshot, &outcome).await {
                Ok(()) => return Ok(outcome),
                Err(RebalanceError::Replication(ReplicationError::ConcurrentModification)) => continue,
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine_primitives::{PartitionId, TableId, Timestamp};
    use replication_api::{Command, KeyCondition, KeyOp, LeaderEvent};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::{broadcast, Mutex as AsyncMutex};

    #[derive(Default)]
    struct FakeCoordinationStore {
        entries: AsyncMutex<HashMap<String, (Vec<u8>, u64)>>,
        next_revision: AtomicU64,
    }

    #[async_trait]
    impl CoordinationStore for FakeCoordinationStore {
        async fn get(&self, key: &str) -> Option<(Vec<u8>, u64)> {
            self.entries.lock().await.get(key).cloned()
        }

        async fn invoke(&self, conditions: &[KeyCondition], ops: &[KeyOp]) -> Result<(), ReplicationError> {
            let mut entries = self.entries.lock().await;
            for condition in conditions {
                let current_revision = entries.get(&condition.key).map(|(_, r)| *r);
                if current_revision != condition.expected_revision {
                    return Err(ReplicationError::ConcurrentModification);
                }
            }
            for op in ops {
                match op {
                    KeyOp::Put { key, value } => {
                        let revision = self.next_revision.fetch_add(1, Ordering::SeqCst);
                        entries.insert(key.clone(), (value.clone(), revision));
                    }
                    KeyOp::Delete { key } => {
                        entries.remove(key);
                    }
                }
            }
            Ok(())
        }
    }

    struct FakeReplicatedLogClient;

    #[async_trait]
    impl ReplicatedLogClient for FakeReplicatedLogClient {
        async fn append(&self, _group: TablePartitionId, _command: Command) -> Result<Timestamp, ReplicationError> {
            Ok(Timestamp::ZERO)
        }

        fn subscribe_leader_events(&self) -> broadcast::Receiver<LeaderEvent> {
            broadcast::channel(1).1
        }

        async fn change_peers(&self, _group: TablePartitionId, _peers: BTreeSet<Assignment>) -> Result<(), ReplicationError> {
            Ok(())
        }
    }

    fn group() -> TablePartitionId {
        TablePartitionId::new(TableId(1), PartitionId(0))
    }

    fn set(ids: &[&str]) -> BTreeSet<Assignment> {
        ids.iter().map(|id| Assignment::peer(*id)).collect()
    }

    async fn seed(coordination: &FakeCoordinationStore, kind: AssignmentKind, group: TablePartitionId, value: &BTreeSet<Assignment>) {
        let key = replication_api::assignment_key(kind, group.table_id, group.partition_id);
        coordination
            .compare_and_set(&key, None, serde_json::to_vec(value).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn seed_scenario_six_end_to_end_through_the_listener() {
        let coordination = Arc::new(FakeCoordinationStore::default());
        let log = Arc::new(FakeReplicatedLogClient);
        let listener = RebalanceEventsListener::new(log, coordination.clone());
        let group = group();

        seed(&coordination, AssignmentKind::Stable, group, &set(&["A", "B", "C"])).await;
        seed(&coordination, AssignmentKind::Planned, group, &set(&["A", "B", "D"])).await;

        let outcome = listener.do_on_new_peers_configuration_applied(group, set(&["A", "B", "D"])).await.unwrap();

        match outcome {
            RebalanceOutcome::SchedulePendingRebalance { stable, pending } => {
                assert_eq!(stable, set(&["A", "B", "D"]));
                assert_eq!(pending, set(&["A", "B", "D"]));
            }
            other => panic!("expected SchedulePendingRebalance, got {other:?}"),
        }

        let stable_key = replication_api::assignment_key(AssignmentKind::Stable, group.table_id, group.partition_id);
        let (stable_bytes, _) = coordination.get(&stable_key).await.unwrap();
        let stable: BTreeSet<Assignment> = serde_json::from_slice(&stable_bytes).unwrap();
        assert_eq!(stable, set(&["A", "B", "D"]));

        let planned_key = replication_api::assignment_key(AssignmentKind::Planned, group.table_id, group.partition_id);
        assert!(coordination.get(&planned_key).await.is_none());
    }

    #[tokio::test]
    async fn leader_elected_issues_peer_change_when_pending_is_set() {
        let coordination = Arc::new(FakeCoordinationStore::default());
        let log = Arc::new(FakeReplicatedLogClient);
        let listener = RebalanceEventsListener::new(log, coordination.clone());
        let group = group();

        seed(&coordination, AssignmentKind::Pending, group, &set(&["A", "B"])).await;
        listener.on_leader_elected(group).await.unwrap();
    }

    #[test]
    fn reconfiguration_error_always_returns_the_same_backoff() {
        let coordination = Arc::new(FakeCoordinationStore::default());
        let log = Arc::new(FakeReplicatedLogClient);
        let listener = RebalanceEventsListener::new(log, coordination);
        let group = group();

        for _ in 0..15 {
            assert_eq!(listener.on_reconfiguration_error(group), RECONFIGURATION_BACKOFF);
        }
    }
}
