use engine_primitives::TableId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaCompatError {
    #[error("row schema version is not backward-compatible with table {table_id}'s current catalog version")]
    IncompatibleSchema { table_id: TableId },
    #[error("schema of table {table_id} changed after the transaction started")]
    SchemaChangedAfterTxStart { table_id: TableId },
}
