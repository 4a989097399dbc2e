//! A multi-granularity (IS/IX/S/SIX/X) lock manager with FIFO per-key
//! waiter queues.
//!
//! Deadlock avoidance is by construction, not detection: callers are
//! expected to always acquire table-level intent locks before row/index
//! locks, and to sort multi-row acquisitions using
//! [`engine_primitives::sorted_unique_row_ids`] (natural `RowId` order).
//! There is no lock-wait timeout and no cycle detector; see spec §4.1 and
//! §8 ("Deadlock freedom by ordering").

mod error;
mod state;

pub use error::LockError;

use std::sync::Arc;

use engine_primitives::{LockKey, LockMode};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use state::{Entry, KeyState};

/// A granted lock. Dropping this value does *not* release the lock —
/// release is explicit via [`LockManager::release`], matching the spec's
/// "always released on commit/abort" lifecycle (the replica listener is the
/// one place responsible for calling `release` at the right time).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Lock {
    pub tx_id: Uuid,
    pub key: LockKey,
    pub mode: LockMode,
}

/// Number of shards the key space is split across. Each shard is an
/// independently-locked `HashMap`, so unrelated keys never contend on the
/// same `parking_lot::Mutex`.
const SHARD_COUNT: usize = 64;

pub struct LockManager {
    shards: Vec<Mutex<FxHashMap<LockKey, KeyState>>>,
    tx_locks: Mutex<FxHashMap<Uuid, Vec<Lock>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(FxHashMap::default())).collect();
        LockManager {
            shards,
            tx_locks: Mutex::new(FxHashMap::default()),
        }
    }

    fn shard_index(key: &LockKey) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % SHARD_COUNT
    }

    fn shard(&self, key: &LockKey) -> &Mutex<FxHashMap<LockKey, KeyState>> {
        &self.shards[Self::shard_index(key)]
    }

    /// Resolves once `mode` is compatible with every lock currently held (or
    /// queued ahead) on `key`. Requests queue FIFO per key: a request waits
    /// only behind predecessors it is incompatible with, per spec §4.1.
    pub async fn acquire(&self, tx_id: Uuid, key: LockKey, mode: LockMode) -> Lock {
        let waiter = {
            let mut shard = self.shard(&key).lock();
            let state = shard.entry(key.clone()).or_insert_with(KeyState::new);
            let idx = state.entries.len();
            let (tx, rx) = oneshot::channel();
            state.entries.push_back(Entry {
                tx_id,
                mode,
                granted: false,
                waker: Some(tx),
            });
            state.try_grant();
            if state.entries[idx].granted {
                None
            } else {
                Some(rx)
            }
        };
        if let Some(rx) = waiter {
            // The sender side is only ever dropped after being fired by
            // `try_grant`, so this can't spuriously error.
            let _ = rx.await;
        }
        let lock = Lock {
            tx_id,
            key,
            mode,
        };
        self.tx_locks.lock().entry(tx_id).or_default().push(lock.clone());
        lock
    }

    /// Like [`Self::acquire`] but never suspends: grants the lock
    /// immediately if compatible with everything currently on the key, or
    /// returns `None` without joining the wait queue. Used by CAS-style
    /// requests (`RW_REPLACE`, `RW_DELETE_EXACT`) that need to check
    /// compatibility before committing to a conditional write.
    pub fn try_acquire(&self, tx_id: Uuid, key: LockKey, mode: LockMode) -> Option<Lock> {
        let mut shard = self.shard(&key).lock();
        let state = shard.entry(key.clone()).or_insert_with(KeyState::new);
        if state.entries.iter().any(|e| e.tx_id != tx_id && !mode.compatible_with(e.mode)) {
            return None;
        }
        state.entries.push_back(Entry {
            tx_id,
            mode,
            granted: true,
            waker: None,
        });
        drop(shard);
        let lock = Lock { tx_id, key, mode };
        self.tx_locks.lock().entry(tx_id).or_default().push(lock.clone());
        Some(lock)
    }

    /// Releases one held lock of `tx_id` on `key` in `mode`, waking any
    /// queued waiters now satisfiable. A no-op (returns `Err`) if no such
    /// lock is held — callers should treat this as a programming error, not
    /// something to retry.
    pub fn release(&self, tx_id: Uuid, key: &LockKey, mode: LockMode) -> Result<(), LockError> {
        let mut shard = self.shard(key).lock();
        let state = shard.get_mut(key).ok_or(LockError::NotHeld)?;
        let pos = state
            .entries
            .iter()
            .position(|e| e.tx_id == tx_id && e.mode == mode && e.granted)
            .ok_or(LockError::NotHeld)?;
        state.entries.remove(pos);
        state.try_grant();
        let is_empty = state.entries.is_empty();
        if is_empty {
            shard.remove(key);
        }
        drop(shard);

        let mut tx_locks = self.tx_locks.lock();
        if let Some(locks) = tx_locks.get_mut(&tx_id) {
            if let Some(pos) = locks.iter().position(|l| &l.key == key && l.mode == mode) {
                locks.remove(pos);
            }
            if locks.is_empty() {
                tx_locks.remove(&tx_id);
            }
        }
        Ok(())
    }

    /// Releases every lock held by `tx_id`. Called on transaction
    /// commit/abort cleanup; idempotent (a second call is a no-op).
    pub fn release_all(&self, tx_id: Uuid) {
        let locks = self.tx_locks.lock().remove(&tx_id).unwrap_or_default();
        for lock in locks {
            let mut shard = self.shard(&lock.key).lock();
            if let Some(state) = shard.get_mut(&lock.key) {
                if let Some(pos) = state
                    .entries
                    .iter()
                    .position(|e| e.tx_id == tx_id && e.mode == lock.mode && e.granted)
                {
                    state.entries.remove(pos);
                    state.try_grant();
                }
                if state.entries.is_empty() {
                    shard.remove(&lock.key);
                }
            }
        }
    }

    /// Enumerates the locks currently held by `tx_id`, for cleanup.
    pub fn locks(&self, tx_id: Uuid) -> Vec<Lock> {
        self.tx_locks.lock().get(&tx_id).cloned().unwrap_or_default()
    }
}

/// A short-term lock handle: released immediately after the caller's write
/// command has been durably appended to the replicated log, not at
/// transaction end (spec §4.1, "Short-term index locks").
pub struct ShortTermLock {
    manager: Arc<LockManager>,
    tx_id: Uuid,
    key: LockKey,
    mode: LockMode,
    released: bool,
}

impl ShortTermLock {
    pub fn new(manager: Arc<LockManager>, lock: Lock) -> Self {
        ShortTermLock {
            manager,
            tx_id: lock.tx_id,
            key: lock.key,
            mode: lock.mode,
            released: false,
        }
    }

    /// Releases the lock now. Safe to call exactly once; subsequent calls
    /// are no-ops so call sites don't need to track whether release already
    /// happened on an error path.
    pub fn release_now(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.manager.release(self.tx_id, &self.key, self.mode);
        }
    }
}

impl Drop for ShortTermLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_primitives::{PartitionId, RowId, TableId};

    fn row_key(table: u32, n: u128) -> LockKey {
        LockKey::Row(TableId(table), RowId::new(PartitionId(0), uuid::Uuid::from_u128(n)))
    }

    #[tokio::test]
    async fn compatible_locks_both_acquire_immediately() {
        let mgr = LockManager::new();
        let t1 = Uuid::from_u128(1);
        let t2 = Uuid::from_u128(2);
        let key = row_key(1, 1);

        let l1 = mgr.acquire(t1, key.clone(), LockMode::S).await;
        let l2 = tokio::time::timeout(std::time::Duration::from_millis(50), mgr.acquire(t2, key.clone(), LockMode::S))
            .await
            .expect("S+S must not block");
        assert_eq!(l1.mode, LockMode::S);
        assert_eq!(l2.mode, LockMode::S);
    }

    #[tokio::test]
    async fn exclusive_blocks_until_release() {
        let mgr = Arc::new(LockManager::new());
        let t1 = Uuid::from_u128(1);
        let t2 = Uuid::from_u128(2);
        let key = row_key(1, 1);

        let _l1 = mgr.acquire(t1, key.clone(), LockMode::X).await;

        let mgr2 = mgr.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move { mgr2.acquire(t2, key2, LockMode::X).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "t2 should still be waiting on t1's X lock");

        mgr.release(t1, &key, LockMode::X).unwrap();
        let l2 = tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("t2 should be granted after release")
            .unwrap();
        assert_eq!(l2.tx_id, t2);
    }

    #[tokio::test]
    async fn fifo_prevents_starvation_of_blocked_exclusive() {
        // t1 holds S. t2 queues for X (blocked). t3 then requests S: per
        // spec, t3 must wait behind t2 even though t3's S would be
        // compatible with t1's still-held S, to avoid starving t2 forever.
        let mgr = Arc::new(LockManager::new());
        let t1 = Uuid::from_u128(1);
        let t2 = Uuid::from_u128(2);
        let t3 = Uuid::from_u128(3);
        let key = row_key(1, 1);

        let _l1 = mgr.acquire(t1, key.clone(), LockMode::S).await;

        let mgr2 = mgr.clone();
        let key2 = key.clone();
        let t2_waiter = tokio::spawn(async move { mgr2.acquire(t2, key2, LockMode::X).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let mgr3 = mgr.clone();
        let key3 = key.clone();
        let t3_waiter = tokio::spawn(async move { mgr3.acquire(t3, key3, LockMode::S).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(!t2_waiter.is_finished());
        assert!(!t3_waiter.is_finished(), "t3 must queue behind t2, not jump ahead");

        mgr.release(t1, &key, LockMode::S).unwrap();
        let l2 = tokio::time::timeout(std::time::Duration::from_millis(200), t2_waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(l2.tx_id, t2);

        mgr.release(t2, &key, LockMode::X).unwrap();
        let l3 = tokio::time::timeout(std::time::Duration::from_millis(200), t3_waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(l3.tx_id, t3);
    }

    #[tokio::test]
    async fn release_all_wakes_remaining_waiters() {
        let mgr = Arc::new(LockManager::new());
        let t1 = Uuid::from_u128(1);
        let t2 = Uuid::from_u128(2);
        let key = row_key(1, 1);

        let _l1 = mgr.acquire(t1, key.clone(), LockMode::X).await;
        let mgr2 = mgr.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move { mgr2.acquire(t2, key2, LockMode::X).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        mgr.release_all(t1);
        let l2 = tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(l2.tx_id, t2);
    }

    #[test]
    fn try_acquire_fails_without_blocking_when_incompatible() {
        let mgr = LockManager::new();
        let t1 = Uuid::from_u128(1);
        let t2 = Uuid::from_u128(2);
        let key = row_key(1, 1);

        assert!(mgr.try_acquire(t1, key.clone(), LockMode::X).is_some());
        assert!(mgr.try_acquire(t2, key, LockMode::S).is_none());
    }

    #[tokio::test]
    async fn locks_enumerates_held_locks_for_cleanup() {
        let mgr = LockManager::new();
        let t1 = Uuid::from_u128(1);
        mgr.acquire(t1, LockKey::Table(TableId(1)), LockMode::IX).await;
        mgr.acquire(t1, row_key(1, 1), LockMode::X).await;

        let held = mgr.locks(t1);
        assert_eq!(held.len(), 2);
    }
}
