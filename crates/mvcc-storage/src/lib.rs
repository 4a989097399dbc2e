//! Multi-version row storage for a single partition: write intents,
//! committed version chains, pending-row tracking for cleanup, and
//! low-watermark-driven GC.

pub mod chain;
pub mod error;
pub mod low_watermark;
pub mod memory;
pub mod pending_rows;
pub mod recovery;
pub mod storage;
pub mod update_handler;

pub use chain::{CommittedVersion, IntentVersion, ReadResult, ReadResultKind, VersionChain};
pub use error::StorageError;
pub use low_watermark::{spawn_gc_loop, LowWatermark};
pub use memory::InMemoryPartitionStorage;
pub use pending_rows::PendingRows;
pub use recovery::recover_orphan_intents;
pub use storage::{HeadSnapshot, PartitionStorage};
pub use update_handler::StorageUpdateHandler;
