use std::sync::Arc;
use std::time::Duration;

use engine_primitives::Timestamp;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::PartitionStorage;

/// Tracks the global read horizon (spec §5, "Safe-time tracker: single-
/// writer ... many readers" — the low-watermark has the same shape: one
/// writer advances it, many GC passes and read paths observe it).
#[derive(Default)]
pub struct LowWatermark {
    current: Mutex<Timestamp>,
}

impl LowWatermark {
    pub fn new() -> Self {
        LowWatermark {
            current: Mutex::new(Timestamp::ZERO),
        }
    }

    pub fn get(&self) -> Timestamp {
        *self.current.lock()
    }

    /// Advances the low-watermark. Rejects non-monotonic updates rather than
    /// silently clamping, since a caller passing a stale value is a bug
    /// worth surfacing.
    pub fn advance(&self, new_value: Timestamp) -> Result<(), StorageError> {
        let mut current = self.current.lock();
        if new_value < *current {
            return Err(StorageError::LowWatermarkRegression {
                attempted: format!("{new_value}"),
                current: format!("{current}"),
            });
        }
        *current = new_value;
        Ok(())
    }
}

/// Drives batched GC below the low-watermark on a fixed interval, the
/// asynchronous analogue of spec §4.2's "Batch GC". Returns a handle whose
/// `abort()` stops the loop; dropping the handle also stops it.
pub fn spawn_gc_loop(
    storage: Arc<dyn PartitionStorage>,
    low_watermark: Arc<LowWatermark>,
    batch_size: usize,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let lwm = low_watermark.get();
            if lwm == Timestamp::ZERO {
                continue;
            }
            let scanned = storage.gc_pass(lwm, batch_size);
            if scanned > 0 {
                debug!(scanned, low_watermark = %lwm, "ran GC pass");
            }
        }
    })
}
