//! The rebalance events listener: drives the five-key assignment state
//! machine (stable/pending/planned/switchReduce/switchAppend) in the
//! coordination metastore as replica-set membership changes converge.

pub mod coordination;
pub mod derive;
pub mod error;
pub mod listener;
pub mod state;

pub use coordination::AssignmentStore;
pub use derive::{derive_next_state, RebalanceOutcome};
pub use error::RebalanceError;
pub use listener::RebalanceEventsListener;
pub use state::{AssignmentSnapshot, Versioned};
