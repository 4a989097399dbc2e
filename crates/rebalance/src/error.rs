use thiserror::Error;

#[derive(Error, Debug)]
pub enum RebalanceError {
    #[error(transparent)]
    Replication(#[from] replication_api::ReplicationError),
    #[error("assignment value at key {0} could not be decoded")]
    Corrupt(String),
}
