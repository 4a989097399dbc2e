use engine_primitives::Timestamp;

/// The lifecycle state of a transaction, as tracked by its commit partition
/// (spec §3, "TransactionMeta"). `Abandoned` covers both a commit and an
/// abort whose coordinator was lost before the outcome could be recorded
/// durably everywhere; from a reader's perspective it behaves like a
/// terminal, unrecoverable state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxState {
    Pending,
    Committed,
    Aborted,
    Abandoned,
}

/// The commit partition's authoritative record of a transaction's outcome.
///
/// **Invariant:** `state == Committed` iff `commit_ts.is_some()`. This is
/// enforced at construction; there is no public way to build a
/// `TransactionMeta` that violates it.
#[derive(Clone, Debug)]
pub struct TransactionMeta {
    pub state: TxState,
    pub coordinator_id: String,
    pub commit_ts: Option<Timestamp>,
}

impl TransactionMeta {
    pub fn pending(coordinator_id: impl Into<String>) -> Self {
        TransactionMeta {
            state: TxState::Pending,
            coordinator_id: coordinator_id.into(),
            commit_ts: None,
        }
    }

    pub fn committed(coordinator_id: impl Into<String>, commit_ts: Timestamp) -> Self {
        TransactionMeta {
            state: TxState::Committed,
            coordinator_id: coordinator_id.into(),
            commit_ts: Some(commit_ts),
        }
    }

    pub fn aborted(coordinator_id: impl Into<String>) -> Self {
        TransactionMeta {
            state: TxState::Aborted,
            coordinator_id: coordinator_id.into(),
            commit_ts: None,
        }
    }

    pub fn abandoned(coordinator_id: impl Into<String>) -> Self {
        TransactionMeta {
            state: TxState::Abandoned,
            coordinator_id: coordinator_id.into(),
            commit_ts: None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self.state, TxState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_always_carries_a_commit_timestamp() {
        let meta = TransactionMeta::committed("node-1", Timestamp::new(5, 0, 1));
        assert_eq!(meta.state, TxState::Committed);
        assert!(meta.commit_ts.is_some());
    }

    #[test]
    fn pending_is_not_final_but_others_are() {
        assert!(!TransactionMeta::pending("node-1").is_final());
        assert!(TransactionMeta::committed("node-1", Timestamp::new(1, 0, 1)).is_final());
        assert!(TransactionMeta::aborted("node-1").is_final());
        assert!(TransactionMeta::abandoned("node-1").is_final());
    }
}
