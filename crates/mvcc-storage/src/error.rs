use engine_primitives::RowId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("rowId {0} has no write intent to commit/abort")]
    NoIntentToResolve(RowId),
    #[error(
        "invariant violated: next committed version ({next_commit_ts:?}) is newer than lastCommitTs ({last_commit_ts:?}) for rowId {row_id}"
    )]
    StaleCommitAssertion {
        row_id: RowId,
        next_commit_ts: String,
        last_commit_ts: String,
    },
    #[error("low-watermark must advance monotonically: {attempted:?} < current {current:?}")]
    LowWatermarkRegression { attempted: String, current: String },
}
