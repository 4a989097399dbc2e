use std::collections::BTreeSet;

use replication_api::Assignment;

/// The outcome of one round of `doOnNewPeersConfigurationApplied` (spec
/// §4.4 step 4): exactly one of four mutually exclusive branches, carrying
/// the new values to write for the keys that branch touches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RebalanceOutcome {
    /// Still converging towards `planned`: `stable` is untouched.
    SwitchAppend {
        pending: BTreeSet<Assignment>,
        switch_reduce: BTreeSet<Assignment>,
        switch_append: BTreeSet<Assignment>,
    },
    /// Still converging towards `planned`, this round shedding nodes.
    SwitchReduce {
        pending: BTreeSet<Assignment>,
        switch_reduce: BTreeSet<Assignment>,
        switch_append: BTreeSet<Assignment>,
    },
    /// Converged to `newStable`; `planned` becomes the new `pending` target
    /// and is cleared.
    SchedulePendingRebalance { stable: BTreeSet<Assignment>, pending: BTreeSet<Assignment> },
    /// Converged to `newStable` with nothing further queued.
    FinishRebalance { stable: BTreeSet<Assignment> },
}

/// Derives the five-key assignment update for one round, following spec
/// §4.4 step 2's formulas exactly.
///
/// `calculated_assignments` stands in for the zone-distribution-derived
/// candidate node set the source computes from distribution-zone filters
/// (an explicit non-goal per spec §1); this workspace takes it as
/// `old_stable ∪ new_stable` — the universe of nodes either currently or
/// about to be assigned — which is the narrowest set that makes the
/// `pendingAddition` formula well-defined without a zone-filter engine. See
/// DESIGN.md for this decision.
pub fn derive_next_state(
    old_stable: &BTreeSet<Assignment>,
    new_stable: &BTreeSet<Assignment>,
    switch_reduce: &BTreeSet<Assignment>,
    switch_append: &BTreeSet<Assignment>,
    planned: Option<&BTreeSet<Assignment>>,
) -> RebalanceOutcome {
    let calculated_assignments: BTreeSet<Assignment> = old_stable.union(new_stable).cloned().collect();

    let reduced_nodes: BTreeSet<Assignment> = switch_reduce.difference(new_stable).cloned().collect();
    let added_nodes: BTreeSet<Assignment> = new_stable.difference(old_stable).cloned().collect();
    let calculated_switch_reduce: BTreeSet<Assignment> = switch_reduce.difference(&reduced_nodes).cloned().collect();
    let calculated_switch_append: BTreeSet<Assignment> = switch_append
        .union(&reduced_nodes)
        .cloned()
        .collect::<BTreeSet<_>>()
        .difference(&added_nodes)
        .cloned()
        .collect::<BTreeSet<_>>()
        .intersection(&calculated_assignments)
        .cloned()
        .collect();
    let pending_reduction: BTreeSet<Assignment> = new_stable.difference(switch_reduce).cloned().collect();
    let pending_addition: BTreeSet<Assignment> = new_stable
        .union(&reduced_nodes)
        .cloned()
        .collect::<BTreeSet<_>>()
        .intersection(&calculated_assignments)
        .cloned()
        .collect();

    if !calculated_switch_append.is_empty() {
        RebalanceOutcome::SwitchAppend {
            pending: pending_addition,
            switch_reduce: calculated_switch_reduce,
            switch_append: calculated_switch_append,
        }
    } else if !calculated_switch_reduce.is_empty() {
        RebalanceOutcome::SwitchReduce {
            pending: pending_reduction,
            switch_reduce: calculated_switch_reduce,
            switch_append: calculated_switch_append,
        }
    } else if let Some(planned) = planned {
        RebalanceOutcome::SchedulePendingRebalance {
            stable: new_stable.clone(),
            pending: planned.clone(),
        }
    } else {
        RebalanceOutcome::FinishRebalance { stable: new_stable.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> Assignment {
        Assignment::peer(id)
    }

    fn set(ids: &[&str]) -> BTreeSet<Assignment> {
        ids.iter().map(|id| peer(id)).collect()
    }

    /// Seed scenario 6: stable={A,B,C}, planned={A,B,D}; after "new peers
    /// {A,B,D} applied", stable={A,B,D}, planned=∅, pending=∅.
    #[test]
    fn seed_scenario_six_converges_directly_when_no_switch_sets_pending() {
        let old_stable = set(&["A", "B", "C"]);
        let new_stable = set(&["A", "B", "D"]);
        let planned = set(&["A", "B", "D"]);

        let outcome = derive_next_state(&old_stable, &new_stable, &BTreeSet::new(), &BTreeSet::new(), Some(&planned));

        match outcome {
            RebalanceOutcome::SchedulePendingRebalance { stable, pending } => {
                assert_eq!(stable, new_stable);
                assert_eq!(pending, planned);
            }
            other => panic!("expected SchedulePendingRebalance, got {other:?}"),
        }
    }

    #[test]
    fn finish_rebalance_when_nothing_planned_and_no_switch_sets() {
        let old_stable = set(&["A", "B", "C"]);
        let new_stable = set(&["A", "B", "D"]);

        let outcome = derive_next_state(&old_stable, &new_stable, &BTreeSet::new(), &BTreeSet::new(), None);

        assert_eq!(outcome, RebalanceOutcome::FinishRebalance { stable: new_stable });
    }

    #[test]
    fn switch_reduce_branch_taken_while_reduced_nodes_still_pending_removal() {
        // switchReduce names C as a node to shed; new_stable still has it,
        // so reducedNodes is empty and calculatedSwitchReduce stays
        // non-empty, keeping us in the SwitchReduce branch.
        let old_stable = set(&["A", "B", "C"]);
        let new_stable = set(&["A", "B", "C"]);
        let switch_reduce = set(&["C"]);

        let outcome = derive_next_state(&old_stable, &new_stable, &switch_reduce, &BTreeSet::new(), None);

        match outcome {
            RebalanceOutcome::SwitchReduce { switch_reduce, .. } => {
                assert_eq!(switch_reduce, set(&["C"]));
            }
            other => panic!("expected SwitchReduce, got {other:?}"),
        }
    }

    #[test]
    fn switch_append_branch_taken_when_appended_node_not_yet_in_stable() {
        // switchAppend names D as a node being added; new_stable doesn't
        // have it yet, so calculatedSwitchAppend stays non-empty.
        let old_stable = set(&["A", "B"]);
        let new_stable = set(&["A", "B"]);
        let switch_append = set(&["D"]);
        let planned = set(&["A", "B", "D"]);

        let outcome = derive_next_state(&old_stable, &new_stable, &BTreeSet::new(), &switch_append, Some(&planned));

        match outcome {
            RebalanceOutcome::SwitchAppend { switch_append, .. } => {
                assert_eq!(switch_append, set(&["D"]));
            }
            other => panic!("expected SwitchAppend, got {other:?}"),
        }
    }
}
