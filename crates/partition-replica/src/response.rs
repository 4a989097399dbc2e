use engine_primitives::{BinaryRow, RowId};

/// The result of a request handled by [`crate::listener::ReplicaListener`].
/// One shared enum rather than one type per request variant, since the
/// request taxonomy of spec §6 maps onto a small, closed set of output
/// shapes regardless of which request produced them.
#[derive(Clone, Debug)]
pub enum ReplicaResponse {
    /// `RW_GET`, `RO_GET`, direct `RO_GET`: the resolved row, or `None` if
    /// absent/deleted.
    Row(Option<BinaryRow>),
    /// `RW_GET_ALL`, `RO_GET_ALL`, direct `RO_GET_ALL`: null-padded per spec
    /// §4.3's request table.
    Rows(Vec<Option<BinaryRow>>),
    /// `RW_INSERT`, `RW_UPSERT`, `RW_DELETE`: the write was applied: nothing
    /// further to report.
    Applied,
    /// The previous value, for `RW_GET_AND_UPSERT` / `RW_GET_AND_REPLACE` /
    /// `RW_GET_AND_DELETE`.
    PreviousRow(Option<BinaryRow>),
    /// `RW_REPLACE`, `RW_DELETE_EXACT`: whether the conditional write fired.
    ConditionResult(bool),
    /// `RW_SCAN`/`RO_SCAN` retrieve-batch: the rows in this batch plus
    /// whether the cursor is now exhausted.
    ScanBatch { rows: Vec<(RowId, Option<BinaryRow>)>, exhausted: bool },
    /// `TX_FINISH`, `TX_CLEANUP`, `SAFE_TIME_SYNC`, `BUILD_INDEX`: the
    /// command was durably applied; no payload to return.
    Ack,
}
