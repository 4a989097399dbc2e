use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TxStateError {
    #[error("no transaction meta recorded for txId {0}")]
    Unknown(Uuid),
    #[error("txId {0} is already finalized as {1:?}, cannot transition to {2:?}")]
    AlreadyFinalized(Uuid, crate::meta::TxState, crate::meta::TxState),
}
