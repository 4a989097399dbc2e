use std::collections::BTreeSet;

use replication_api::Assignment;

/// A value read from the coordination store together with the revision it
/// was read at, so a later write can be conditioned on nothing having
/// changed in between (spec §4.4 step 3, "Guard the update with compound
/// revision-equality conditions").
#[derive(Clone, Debug)]
pub struct Versioned<T> {
    pub value: T,
    /// `None` means the key did not exist at read time.
    pub revision: Option<u64>,
}

/// The five assignment keys of one partition group, read together as one
/// atomic snapshot (spec §4.4 step 1).
#[derive(Clone, Debug)]
pub struct AssignmentSnapshot {
    pub stable: Versioned<BTreeSet<Assignment>>,
    pub pending: Versioned<BTreeSet<Assignment>>,
    pub planned: Versioned<Option<BTreeSet<Assignment>>>,
    pub switch_reduce: Versioned<BTreeSet<Assignment>>,
    pub switch_append: Versioned<BTreeSet<Assignment>>,
}
