//! The partition replica: the entry point every request targeted at a
//! table partition group passes through, whichever physical replica
//! receives it. Wires together locking, MVCC storage, transaction-state
//! resolution, schema compatibility, safe-time, and the replicated log
//! into the request handlers of spec §4.3/§6.

pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod index_builder;
pub mod listener;
pub mod primary;
pub mod response;
pub mod safe_time;

pub use config::ReplicaConfig;
pub use cursor::CursorRegistry;
pub use dispatch::PartitionCleanupDispatcher;
pub use error::{ErrorCode, ReplicaError};
pub use index_builder::IndexBuilder;
pub use listener::ReplicaListener;
pub use primary::{await_primary_replica, ensure_replica_is_primary, is_primary_now};
pub use response::ReplicaResponse;
pub use safe_time::SafeTimeTracker;
