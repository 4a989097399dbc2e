use std::sync::Arc;
use std::time::Duration;

use engine_primitives::{TablePartitionId, Timestamp};
use replication_api::{PlacementDriverClient, PrimaryReplicaMeta};

use crate::error::ReplicaError;

/// Spec §4.3, `ensureReplicaIsPrimary`: for requests carrying an
/// enlistment-consistency token, fails with `PrimaryReplicaMiss` if the
/// token doesn't match the current lease, or the lease has already expired
/// at `now`.
pub fn ensure_replica_is_primary(meta: &PrimaryReplicaMeta, token: u64, now: Timestamp) -> Result<(), ReplicaError> {
    if meta.enlistment_consistency_token != token || meta.lease_expiration <= now {
        return Err(ReplicaError::PrimaryReplicaMiss);
    }
    Ok(())
}

/// The read-path counterpart: an advisory flag, not a hard failure, since
/// read-only requests may still proceed against a non-primary replica once
/// safe-time has caught up (spec §4.3, "For read-only requests the result
/// is an advisory `isPrimary` flag").
pub fn is_primary_now(meta: &PrimaryReplicaMeta, token: u64, now: Timestamp) -> bool {
    meta.enlistment_consistency_token == token && meta.lease_expiration > now
}

/// Resolves the current primary-replica meta for `group`, bounded by the
/// ceiling in spec §5 ("Awaiting primary-replica has a 10 s ceiling;
/// exceeded → REPLICA_UNAVAILABLE").
pub async fn await_primary_replica(
    placement: &Arc<dyn PlacementDriverClient>,
    group: TablePartitionId,
    timeout: Duration,
) -> Result<PrimaryReplicaMeta, ReplicaError> {
    match tokio::time::timeout(timeout, placement.primary_replica_meta(group)).await {
        Ok(Ok(meta)) => Ok(meta),
        Ok(Err(_)) => Err(ReplicaError::ReplicaUnavailable),
        Err(_) => Err(ReplicaError::ReplicaUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(p: u64) -> Timestamp {
        Timestamp::new(p, 0, 1)
    }

    fn meta(token: u64, expires: u64) -> PrimaryReplicaMeta {
        PrimaryReplicaMeta {
            enlistment_consistency_token: token,
            lease_expiration: ts(expires),
        }
    }

    #[test]
    fn mismatched_token_is_a_primary_miss() {
        let m = meta(1, 100);
        assert!(ensure_replica_is_primary(&m, 2, ts(5)).is_err());
    }

    #[test]
    fn expired_lease_is_a_primary_miss_even_with_matching_token() {
        let m = meta(1, 10);
        assert!(ensure_replica_is_primary(&m, 1, ts(10)).is_err());
        assert!(ensure_replica_is_primary(&m, 1, ts(20)).is_err());
    }

    #[test]
    fn valid_token_and_live_lease_passes() {
        let m = meta(1, 100);
        assert!(ensure_replica_is_primary(&m, 1, ts(5)).is_ok());
    }

    #[test]
    fn is_primary_now_mirrors_ensure_without_erroring() {
        let m = meta(1, 100);
        assert!(is_primary_now(&m, 1, ts(5)));
        assert!(!is_primary_now(&m, 2, ts(5)));
        assert!(!is_primary_now(&m, 1, ts(200)));
    }
}
