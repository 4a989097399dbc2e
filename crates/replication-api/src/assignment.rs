use std::cmp::Ordering;
use std::fmt;

use engine_primitives::{PartitionId, TableId};
use serde::{Deserialize, Serialize};

/// One member of a partition group's replica set: either a voting peer or a
/// non-voting learner, identified by its node's consistent id (spec §3,
/// "Assignment state ... each a set of {peer|learner, consistentId}").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub consistent_id: String,
    pub is_peer: bool,
}

impl Assignment {
    pub fn peer(consistent_id: impl Into<String>) -> Self {
        Assignment {
            consistent_id: consistent_id.into(),
            is_peer: true,
        }
    }

    pub fn learner(consistent_id: impl Into<String>) -> Self {
        Assignment {
            consistent_id: consistent_id.into(),
            is_peer: false,
        }
    }
}

impl Ord for Assignment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.consistent_id.cmp(&other.consistent_id).then(self.is_peer.cmp(&other.is_peer))
    }
}

impl PartialOrd for Assignment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Which of the five coordination-store keys an [`Assignment`] set belongs
/// to (spec §3, §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AssignmentKind {
    Stable,
    Pending,
    Planned,
    SwitchReduce,
    SwitchAppend,
}

impl fmt::Display for AssignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssignmentKind::Stable => "stable",
            AssignmentKind::Pending => "pending",
            AssignmentKind::Planned => "planned",
            AssignmentKind::SwitchReduce => "switchReduce",
            AssignmentKind::SwitchAppend => "switchAppend",
        };
        f.write_str(s)
    }
}

/// Builds the persisted coordination-store key for one assignment kind of
/// one partition group, e.g. `assignments.stable.3_0` (spec §6).
pub fn assignment_key(kind: AssignmentKind, table_id: TableId, partition_id: PartitionId) -> String {
    format!("assignments.{kind}.{}_{}", table_id.0, partition_id.0)
}
