use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum LockError {
    #[error("no matching lock is held for the given transaction/key/mode")]
    NotHeld,
}
