use engine_primitives::{BinaryRow, TablePartitionId, Timestamp};
use uuid::Uuid;

/// The kind of value a read against a version chain resolved to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadResultKind {
    Committed,
    WriteIntent,
    Empty,
}

/// The result of reading a single row from a version chain, mirroring the
/// `ReadResult` shape of spec §3.
#[derive(Clone, Debug)]
pub struct ReadResult {
    pub kind: ReadResultKind,
    pub row: Option<BinaryRow>,
    pub commit_ts: Option<Timestamp>,
    pub tx_id: Option<Uuid>,
    pub commit_table_id: Option<u32>,
    pub commit_part_id: Option<u32>,
    /// The commit timestamp of the newest committed version below the head,
    /// when the head is a write intent — this is the `lastCommitTimestamp`
    /// primaries attach to `UpdateCommand`s for speculative cleanup.
    pub newest_commit_ts: Option<Timestamp>,
}

impl ReadResult {
    pub fn empty() -> Self {
        ReadResult {
            kind: ReadResultKind::Empty,
            row: None,
            commit_ts: None,
            tx_id: None,
            commit_table_id: None,
            commit_part_id: None,
            newest_commit_ts: None,
        }
    }

    pub fn committed(row: Option<BinaryRow>, commit_ts: Timestamp) -> Self {
        ReadResult {
            kind: ReadResultKind::Committed,
            row,
            commit_ts: Some(commit_ts),
            tx_id: None,
            commit_table_id: None,
            commit_part_id: None,
            newest_commit_ts: None,
        }
    }

    pub fn write_intent(
        row: Option<BinaryRow>,
        tx_id: Uuid,
        commit_partition: TablePartitionId,
        newest_commit_ts: Option<Timestamp>,
    ) -> Self {
        ReadResult {
            kind: ReadResultKind::WriteIntent,
            row,
            commit_ts: None,
            tx_id: Some(tx_id),
            commit_table_id: Some(commit_partition.table_id.0),
            commit_part_id: Some(commit_partition.partition_id.0),
            newest_commit_ts,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.kind, ReadResultKind::Committed | ReadResultKind::WriteIntent) && self.row.is_none()
    }
}

/// An uncommitted version: the chain head, if present.
#[derive(Clone, Debug)]
pub struct IntentVersion {
    pub tx_id: Uuid,
    pub commit_partition: TablePartitionId,
    /// `None` represents a tombstone write (delete).
    pub row: Option<BinaryRow>,
}

/// A committed version, ordered within the chain by `commit_ts` descending.
#[derive(Clone, Debug)]
pub struct CommittedVersion {
    pub commit_ts: Timestamp,
    pub row: Option<BinaryRow>,
}

/// The version chain for a single row: at most one write intent (always the
/// head, per spec's invariant), followed by committed versions strictly
/// ordered by `commit_ts` descending.
#[derive(Clone, Debug, Default)]
pub struct VersionChain {
    pub intent: Option<IntentVersion>,
    pub committed: Vec<CommittedVersion>,
}

impl VersionChain {
    pub fn new() -> Self {
        VersionChain::default()
    }

    pub fn is_empty_chain(&self) -> bool {
        self.intent.is_none() && self.committed.is_empty()
    }

    /// The newest committed version's timestamp, if any.
    pub fn newest_committed_ts(&self) -> Option<Timestamp> {
        self.committed.first().map(|v| v.commit_ts)
    }

    /// Inserts a new committed version, maintaining descending order by
    /// `commit_ts`.
    pub fn push_committed(&mut self, commit_ts: Timestamp, row: Option<BinaryRow>) {
        let pos = self.committed.partition_point(|v| v.commit_ts > commit_ts);
        self.committed.insert(pos, CommittedVersion { commit_ts, row });
    }

    /// Resolves a read at `read_ts` against this chain, per spec §4.3 step 1:
    /// if the head is a write intent it is returned as-is (resolution of
    /// *what it means* for the reader happens one level up, in the replica
    /// listener); otherwise the newest committed version with
    /// `commit_ts <= read_ts` is returned.
    pub fn read_at(&self, read_ts: Timestamp) -> ReadResult {
        if let Some(intent) = &self.intent {
            let newest = self.newest_committed_ts();
            return ReadResult::write_intent(intent.row.clone(), intent.tx_id, intent.commit_partition, newest);
        }
        self.committed_at(read_ts)
    }

    /// Returns the newest committed version with `commit_ts <= read_ts`,
    /// ignoring any write intent. Used both for direct reads and for
    /// "read the last committed version below readTs" fallback paths in
    /// write-intent resolution.
    pub fn committed_at(&self, read_ts: Timestamp) -> ReadResult {
        match self.committed.iter().find(|v| v.commit_ts <= read_ts) {
            Some(v) => ReadResult::committed(v.row.clone(), v.commit_ts),
            None => ReadResult::empty(),
        }
    }
}
