use std::time::Duration;

/// Tunables for a [`crate::listener::ReplicaListener`], gathered into one
/// struct the way the teacher's `config.rs` groups datastore/commitlog
/// tunables rather than scattering magic numbers through call sites.
#[derive(Clone, Copy, Debug)]
pub struct ReplicaConfig {
    /// Spec §4.2, "Batch GC": rows scanned per `gc_pass` invocation.
    pub on_update_batch_size: usize,
    /// Interval between batch-GC passes once the low-watermark is above
    /// zero.
    pub gc_interval: Duration,
    /// Spec §4.3 `processTxFinishAction` step 4: cleanup attempts per
    /// enlisted partition before giving up and marking the tx locally
    /// final.
    pub cleanup_retry_attempts: u32,
    /// Backoff between cleanup retries.
    pub cleanup_retry_backoff: Duration,
    /// Spec §5, "Awaiting primary-replica has a 10 s ceiling".
    pub primary_replica_await_timeout: Duration,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            on_update_batch_size: 1000,
            gc_interval: Duration::from_secs(5),
            cleanup_retry_attempts: 5,
            cleanup_retry_backoff: Duration::from_millis(500),
            primary_replica_await_timeout: Duration::from_secs(10),
        }
    }
}
