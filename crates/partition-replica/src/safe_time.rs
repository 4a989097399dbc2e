use engine_primitives::Timestamp;
use tokio::sync::watch;

/// A per-partition monotonic HLC tracker (spec GLOSSARY, "Safe-time"):
/// single-writer (the command applier advancing it as commands land),
/// many readers waiting for it to reach a target.
///
/// Backed by a [`watch`] channel rather than a plain `Mutex<Timestamp>` so
/// `wait_until` can suspend cheaply instead of polling (spec §5,
/// "Suspension points: Safe-time wait").
pub struct SafeTimeTracker {
    tx: watch::Sender<Timestamp>,
}

impl Default for SafeTimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeTimeTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Timestamp::ZERO);
        SafeTimeTracker { tx }
    }

    pub fn current(&self) -> Timestamp {
        *self.tx.borrow()
    }

    /// Advances safe-time to `new_value`. A no-op if `new_value` is not
    /// ahead of the current value — safe-time is monotonic by construction,
    /// never regressed by a stale or reordered advance call.
    pub fn advance(&self, new_value: Timestamp) {
        self.tx.send_if_modified(|current| {
            if new_value > *current {
                *current = new_value;
                true
            } else {
                false
            }
        });
    }

    /// Suspends until safe-time reaches at least `target` (spec §4.3,
    /// "RO reads must wait until safe-time >= readTimestamp").
    pub async fn wait_until(&self, target: Timestamp) {
        if self.current() >= target {
            return;
        }
        let mut rx = self.tx.subscribe();
        while *rx.borrow() < target {
            if rx.changed().await.is_err() {
                // Sender dropped (tracker torn down mid-wait); nothing more
                // will ever arrive, so stop waiting rather than hang.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(p: u64) -> Timestamp {
        Timestamp::new(p, 0, 1)
    }

    #[test]
    fn advance_ignores_regression() {
        let tracker = SafeTimeTracker::new();
        tracker.advance(ts(10));
        tracker.advance(ts(5));
        assert_eq!(tracker.current(), ts(10));
    }

    #[tokio::test]
    async fn wait_until_returns_immediately_if_already_reached() {
        let tracker = SafeTimeTracker::new();
        tracker.advance(ts(10));
        tokio::time::timeout(std::time::Duration::from_millis(50), tracker.wait_until(ts(5)))
            .await
            .expect("must not block");
    }

    #[tokio::test]
    async fn wait_until_resolves_once_advanced_past_target() {
        use std::sync::Arc;
        let tracker = Arc::new(SafeTimeTracker::new());
        let waiter = tracker.clone();
        let handle = tokio::spawn(async move { waiter.wait_until(ts(10)).await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        tracker.advance(ts(10));
        tokio::time::timeout(std::time::Duration::from_millis(200), handle).await.unwrap().unwrap();
    }
}
