use engine_primitives::{IndexId, RowId};

/// The narrow callback a partition replica drives when it applies a
/// `BuildIndexCommand` (spec §6 SUPPLEMENT: "forward the command unchanged
/// to the log; on application, call a narrow callback"). Building and
/// maintaining an actual index structure is out of scope (spec §1, "no
/// zone-filter / index-structure language"); this trait is only the seam a
/// real index builder would plug into.
pub trait IndexBuilder: Send + Sync {
    /// `row_ids` is one batch of an index build in progress; `finish`
    /// signals the last batch.
    fn on_build_index(&self, index_id: IndexId, row_ids: &[RowId], finish: bool);
}
